use std::path::PathBuf;

/// Failures of a single supervisor operation. None of these tear down the
/// supervisor; stream termination is handled by the reader and never
/// returned here.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spawned process has no {0} pipe")]
    MissingPipe(&'static str),
    #[error("failed to write to server console: {0}")]
    Write(#[source] std::io::Error),
    #[error("timed out writing to server console")]
    WriteTimeout,
    #[error("failed to signal server process: {0}")]
    Signal(#[source] std::io::Error),
}
