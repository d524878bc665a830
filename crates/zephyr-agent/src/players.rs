use std::{
    collections::HashSet,
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use zephyr_process::{Player, ServerMessage};

use crate::{
    error::SupervisorError,
    gate::{ReputationGate, Verdict},
    hub::ConnectionHub,
    parser::{EventParser, PlayerEvent},
    roster::Roster,
};

/// Write path into the server console. Gate-triggered kicks go through the
/// same path as client commands.
pub trait ConsoleInput: Clone + Send + Sync + 'static {
    fn send_command(
        &self,
        command: String,
    ) -> impl Future<Output = Result<(), SupervisorError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Lookup failed or timed out; admitted anyway.
    FailOpen,
    Annotated,
    Kicked,
    /// Roster was cleared while the lookup was in flight.
    Stale,
}

#[derive(Clone)]
pub struct GatePolicy {
    pub gate: Option<Arc<dyn ReputationGate>>,
    /// Live toggle; panel config updates flip it without a restart.
    pub enforce: Arc<AtomicBool>,
    pub timeout: Duration,
}

impl GatePolicy {
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            gate: None,
            enforce: Arc::new(AtomicBool::new(false)),
            timeout: crate::support::gate_timeout(),
        }
    }

    fn enforcing(&self) -> bool {
        self.enforce.load(Ordering::Relaxed)
    }

    /// Connect events are held back when spawn events are authoritative.
    fn gates_connects(&self) -> bool {
        self.gate.is_some() && self.enforcing()
    }
}

/// Output pipeline stage turning console lines into roster changes.
pub struct PlayerTracker {
    parser: EventParser,
    roster: Arc<Roster>,
    hub: ConnectionHub,
    policy: GatePolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl PlayerTracker {
    pub fn new(
        parser: EventParser,
        roster: Arc<Roster>,
        hub: ConnectionHub,
        policy: GatePolicy,
    ) -> Self {
        Self {
            parser,
            roster,
            hub,
            policy,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Applies one line. Returns the gate task when a lookup was started.
    pub async fn handle_line<C: ConsoleInput>(
        &self,
        line: &str,
        console: &C,
    ) -> Option<JoinHandle<Admission>> {
        let roster = &self.roster;
        let event = self.parser.parse(line, || roster.names())?;

        match event {
            PlayerEvent::Joined { name, xuid } => {
                if self.policy.gates_connects() {
                    tracing::debug!(%name, "connect held until spawn lookup");
                    return None;
                }
                self.add(Player::new(name, xuid)).await;
                None
            }
            PlayerEvent::Spawned { name, xuid } => {
                if self.policy.gate.is_some() && !xuid.is_empty() {
                    return self.admit(name, xuid, console.clone());
                }
                self.add(Player::new(name, xuid)).await;
                None
            }
            PlayerEvent::Left { name } | PlayerEvent::Kicked { name } => {
                if self.roster.remove(&name) {
                    tracing::info!(%name, "player removed");
                    self.push_roster().await;
                }
                None
            }
        }
    }

    async fn add(&self, player: Player) {
        let name = player.name.clone();
        if self.roster.add(player) {
            tracing::info!(%name, "player added");
            self.push_roster().await;
        }
    }

    async fn push_roster(&self) {
        self.hub
            .push(ServerMessage::players(self.roster.snapshot()))
            .await;
    }

    fn admit<C: ConsoleInput>(
        &self,
        name: String,
        xuid: String,
        console: C,
    ) -> Option<JoinHandle<Admission>> {
        let gate = self.policy.gate.clone()?;
        let guard = InFlight::claim(&self.in_flight, &xuid)?;
        let epoch = self.roster.epoch();
        let lookup = gate.lookup(&xuid);
        let roster = self.roster.clone();
        let hub = self.hub.clone();
        let policy = self.policy.clone();

        Some(tokio::spawn(async move {
            let _guard = guard;
            let verdict = match tokio::time::timeout(policy.timeout, lookup).await {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(err)) => Err(crate::support::format_error_chain(&err)),
                Err(_) => Err("timed out".to_string()),
            };

            if roster.epoch() != epoch {
                tracing::debug!(%name, "discarding reputation result from previous session");
                return Admission::Stale;
            }

            let (player, outcome) = match verdict {
                Err(reason) => {
                    tracing::warn!(%name, %xuid, %reason, "reputation lookup failed; admitting");
                    (Player::new(&name, &xuid), Admission::FailOpen)
                }
                Ok(Verdict::Clear) => (Player::new(&name, &xuid), Admission::Admitted),
                Ok(Verdict::Flagged { reason }) if policy.enforcing() => {
                    let cmd = kick_command(&name, &reason);
                    if let Err(err) = console.send_command(cmd).await {
                        tracing::warn!(%name, error = %err, "kick command failed");
                    }
                    tracing::info!(%name, %xuid, %reason, "flagged player kicked");
                    hub.push(ServerMessage::advisory(format!(
                        "Player {name} ({xuid}) is flagged: {reason}. Kicked."
                    )))
                    .await;
                    return Admission::Kicked;
                }
                Ok(Verdict::Flagged { reason }) => {
                    tracing::info!(%name, %xuid, %reason, "flagged player admitted");
                    hub.push(ServerMessage::advisory(format!(
                        "Player {name} ({xuid}) is flagged: {reason}"
                    )))
                    .await;
                    (
                        Player::new(&name, &xuid).flagged(reason),
                        Admission::Annotated,
                    )
                }
            };

            if roster.add_if_epoch(epoch, player) {
                hub.push(ServerMessage::players(roster.snapshot())).await;
                outcome
            } else {
                Admission::Stale
            }
        }))
    }
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

fn kick_command(name: &str, reason: &str) -> String {
    let name = sanitize(name);
    let reason = sanitize(reason);
    let target = if name.contains(char::is_whitespace) {
        format!("\"{}\"", name.replace('"', ""))
    } else {
        name
    };
    if reason.is_empty() {
        format!("kick {target}")
    } else {
        format!("kick {target} {reason}")
    }
}

/// Marks an identity token as being looked up; released on drop.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<String>>>, key: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.insert(key.to_string()) {
            tracing::debug!(xuid = %key, "reputation lookup already in flight");
            return None;
        }
        Some(Self {
            set: set.clone(),
            key: key.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&self.key);
    }
}
