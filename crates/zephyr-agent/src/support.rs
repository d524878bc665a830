use std::time::Duration;

const DEFAULT_HISTORY_MAX_LINES: usize = 1000;
const DEFAULT_HISTORY_REPLAY_LINES: usize = 100;

pub(crate) fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

pub(crate) fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `DEBUG=1` only raises log verbosity.
pub(crate) fn debug_enabled() -> bool {
    env_flag("DEBUG")
}

pub(crate) fn history_max_lines() -> usize {
    env_usize("ZEPHYR_HISTORY_MAX_LINES")
        .map(|v| v.clamp(100, 50_000))
        .unwrap_or(DEFAULT_HISTORY_MAX_LINES)
}

pub(crate) fn history_replay_lines() -> usize {
    let max = history_max_lines();
    env_usize("ZEPHYR_HISTORY_REPLAY_LINES")
        .map(|v| v.clamp(1, max))
        .unwrap_or(DEFAULT_HISTORY_REPLAY_LINES.min(max))
}

pub(crate) fn gate_timeout() -> Duration {
    Duration::from_millis(
        env_u64("ZEPHYR_GATE_TIMEOUT_MS")
            .map(|v| v.clamp(250, 60_000))
            .unwrap_or(5000),
    )
}

pub(crate) fn write_timeout() -> Duration {
    Duration::from_millis(
        env_u64("ZEPHYR_WRITE_TIMEOUT_MS")
            .map(|v| v.clamp(100, 60_000))
            .unwrap_or(5000),
    )
}

pub(crate) fn stop_wait_timeout() -> Duration {
    Duration::from_millis(
        env_u64("ZEPHYR_STOP_WAIT_MS")
            .map(|v| v.clamp(500, 5 * 60 * 1000))
            .unwrap_or(10_000),
    )
}

pub(crate) fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

#[cfg(target_os = "linux")]
pub(crate) unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // The server must not outlive the agent if the agent is killed.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::format_error_chain;
    use anyhow::Context;

    #[test]
    fn error_chain_joins_causes() {
        let err = Err::<(), _>(anyhow::anyhow!("disk full"))
            .context("write config")
            .unwrap_err();
        assert_eq!(format_error_chain(&err), "write config: disk full");
    }

    #[test]
    fn error_chain_skips_repeated_messages() {
        let err = Err::<(), _>(anyhow::anyhow!("boom"))
            .context("boom")
            .unwrap_err();
        assert_eq!(format_error_chain(&err), "boom");
    }
}
