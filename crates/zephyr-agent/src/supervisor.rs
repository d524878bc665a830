use std::{
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Local};
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
    task::JoinHandle,
};
use tracing::Instrument;
use zephyr_process::{
    STATUS_RUNNING, STATUS_STOPPED, ServerMessage, SessionId, SessionPhase, SessionStatus,
};

use crate::{
    error::SupervisorError, history::OutputHistory, hub::ConnectionHub,
    line_reader::LineReader, players::ConsoleInput, players::PlayerTracker,
};

#[cfg(windows)]
const LINE_TERMINATOR: &str = "\r\n";
#[cfg(not(windows))]
const LINE_TERMINATOR: &str = "\n";

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Proxy executable invoked as `wrapper <server path>`; `None` runs the server directly.
    pub wrapper: Option<PathBuf>,
    pub write_timeout: Duration,
    pub stop_wait: Duration,
}

impl SupervisorOptions {
    pub fn from_env(wrapper: Option<PathBuf>) -> Self {
        Self {
            wrapper,
            write_timeout: crate::support::write_timeout(),
            stop_wait: crate::support::stop_wait_timeout(),
        }
    }
}

struct Session {
    id: SessionId,
    child: Child,
    stdin: ChildStdin,
    pid: Option<u32>,
    started_at: DateTime<Local>,
    reader: Option<JoinHandle<()>>,
}

struct State {
    phase: SessionPhase,
    session: Option<Session>,
    last_exit_code: Option<i32>,
}

struct Inner {
    options: SupervisorOptions,
    state: Mutex<State>,
    tracker: Arc<PlayerTracker>,
    history: Arc<Mutex<OutputHistory>>,
    hub: ConnectionHub,
}

/// Owns the single server process. Every transition and every stdin write
/// is serialized by one state lock; the output reader only takes it when the
/// stream ends. Status pushes go out while the lock is held, so clients see
/// them in transition order.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        options: SupervisorOptions,
        tracker: Arc<PlayerTracker>,
        history: Arc<Mutex<OutputHistory>>,
        hub: ConnectionHub,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                state: Mutex::new(State {
                    phase: SessionPhase::Stopped,
                    session: None,
                    last_exit_code: None,
                }),
                tracker,
                history,
                hub,
            }),
        }
    }

    /// Starts the server, replacing any running session.
    pub async fn start(&self, path: &Path) -> Result<(), SupervisorError> {
        let mut state = self.inner.state.lock().await;
        if state.session.is_some() {
            tracing::info!("restart requested; stopping current session");
            self.terminate(&mut state).await?;
        }

        state.phase = SessionPhase::Starting;
        let spawned = self.spawn(path);
        let (child, stdin, stdout) = match spawned {
            Ok(parts) => parts,
            Err(err) => {
                state.phase = SessionPhase::Stopped;
                tracing::error!(error = %err, path = %path.display(), "server spawn failed");
                return Err(err);
            }
        };

        // The previous reader has been joined, so nothing refills the roster.
        self.inner.tracker.roster().clear();
        let id = SessionId::new();
        let pid = child.id();
        tracing::info!(session = %id, pid = ?pid, path = %path.display(), "server started");
        self.inner
            .hub
            .push(ServerMessage::players(Vec::new()))
            .await;
        self.inner
            .hub
            .push(ServerMessage::status(STATUS_RUNNING))
            .await;

        let reader = self.spawn_reader(id.clone(), stdout);
        state.session = Some(Session {
            id,
            child,
            stdin,
            pid,
            started_at: Local::now(),
            reader: Some(reader),
        });
        state.phase = SessionPhase::Running;
        Ok(())
    }

    fn spawn(&self, path: &Path) -> Result<(Child, ChildStdin, ChildStdout), SupervisorError> {
        let (program, args): (PathBuf, Vec<&Path>) = match &self.inner.options.wrapper {
            Some(wrapper) => (wrapper.clone(), vec![path]),
            None => (path.to_path_buf(), Vec::new()),
        };

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| crate::support::set_parent_death_signal());
            }
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: program.clone(),
            source,
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or(SupervisorError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::MissingPipe("stdout"))?;
        Ok((child, stdin, stdout))
    }

    fn spawn_reader(&self, id: SessionId, stdout: ChildStdout) -> JoinHandle<()> {
        let sup = self.clone();
        let span = tracing::info_span!("console_reader", session = %id);
        tokio::spawn(
            async move {
                let mut reader = LineReader::new(stdout);
                while let Some(line) = reader.next_line().await {
                    sup.inner.history.lock().await.push(line.clone());
                    sup.inner
                        .hub
                        .push(ServerMessage::output(line.clone()))
                        .await;
                    sup.inner.tracker.handle_line(&line, &sup).await;
                }
                sup.on_stream_end(id).await;
            }
            .instrument(span),
        )
    }

    async fn on_stream_end(&self, id: SessionId) {
        let mut state = self.inner.state.lock().await;
        let Some(session) = state.session.as_mut().filter(|s| s.id == id) else {
            tracing::debug!("output closed for a superseded session");
            return;
        };
        // This task is the reader; detach instead of joining it.
        session.reader = None;
        state.phase = SessionPhase::Crashed;
        tracing::warn!(session = %id, "server output closed; cleaning up session");
        if let Err(err) = self.terminate(&mut state).await {
            tracing::warn!(error = %err, "crash cleanup could not signal process");
            state.session = None;
            state.phase = SessionPhase::Stopped;
        }
        self.inner
            .hub
            .push(ServerMessage::status(STATUS_STOPPED))
            .await;
    }

    /// Stops the server. Not running is a no-op.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut state = self.inner.state.lock().await;
        if state.session.is_none() {
            return Ok(());
        }
        self.terminate(&mut state).await?;
        tracing::info!("server stopped");
        self.inner
            .hub
            .push(ServerMessage::status(STATUS_STOPPED))
            .await;
        Ok(())
    }

    /// Kills and reaps the current session and joins its output reader, so no
    /// line of the old session is applied after this returns. A failed signal
    /// leaves the session in place; a failed or slow reap is tolerated.
    async fn terminate(&self, state: &mut State) -> Result<(), SupervisorError> {
        let Some(mut session) = state.session.take() else {
            state.phase = SessionPhase::Stopped;
            return Ok(());
        };
        let prev_phase = state.phase;
        state.phase = SessionPhase::Stopping;

        if let Err(err) = session.child.start_kill() {
            if err.kind() != std::io::ErrorKind::InvalidInput {
                state.phase = prev_phase;
                state.session = Some(session);
                return Err(SupervisorError::Signal(err));
            }
        }
        drop(session.stdin);
        if let Some(reader) = session.reader.take() {
            reader.abort();
            let _ = reader.await;
        }

        match tokio::time::timeout(self.inner.options.stop_wait, session.child.wait()).await {
            Ok(Ok(status)) => {
                state.last_exit_code = status.code();
                tracing::debug!(session = %session.id, ?status, "server process reaped");
            }
            Ok(Err(err)) => {
                tracing::warn!(session = %session.id, error = %err, "waiting for server exit failed");
            }
            Err(_) => {
                tracing::warn!(session = %session.id, "server did not exit within stop wait");
            }
        }
        state.phase = SessionPhase::Stopped;
        Ok(())
    }

    /// Writes one console command. Not running is a no-op.
    pub async fn send(&self, command: &str) -> Result<(), SupervisorError> {
        let mut state = self.inner.state.lock().await;
        if !state.phase.is_running() {
            tracing::debug!(command, "server not running; input dropped");
            return Ok(());
        }
        let Some(session) = state.session.as_mut() else {
            return Ok(());
        };

        let mut line = command.trim_end_matches(['\r', '\n']).to_string();
        line.push_str(LINE_TERMINATOR);
        let stdin = &mut session.stdin;
        let write = async move {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        match tokio::time::timeout(self.inner.options.write_timeout, write).await {
            Ok(Ok(())) => {
                tracing::debug!(command, "console input written");
                Ok(())
            }
            Ok(Err(err)) => Err(SupervisorError::Write(err)),
            Err(_) => Err(SupervisorError::WriteTimeout),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.phase.is_running()
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.inner.state.lock().await;
        let session = state.session.as_ref();
        let uptime_secs = match session {
            Some(s) if state.phase.is_running() => (Local::now() - s.started_at)
                .num_seconds()
                .max(0) as u64,
            _ => 0,
        };
        SessionStatus {
            id: session.map(|s| s.id.clone()),
            phase: state.phase,
            pid: session.and_then(|s| s.pid),
            started_at: session.map(|s| s.started_at.format(TIME_FORMAT).to_string()),
            uptime_secs,
            last_exit_code: state.last_exit_code,
        }
    }
}

impl ConsoleInput for Supervisor {
    fn send_command(
        &self,
        command: String,
    ) -> impl Future<Output = Result<(), SupervisorError>> + Send {
        let this = self.clone();
        async move { this.send(&command).await }
    }
}
