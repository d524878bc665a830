use std::path::Path;

use zephyr_process::{ServerInfo, SessionStatus};

use crate::config::ConfigStore;

pub const UNKNOWN_VERSION: &str = "unknown";
pub const DEFAULT_MAX_PLAYERS: u32 = 20;
/// Metadata is only looked for in this many trailing history lines.
pub const SCAN_WINDOW: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLine {
    pub version: String,
    pub loader: String,
}

fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for next in chars.by_ref() {
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            } else {
                chars.next();
            }
        } else if !c.is_control() {
            out.push(c);
        }
    }
    out
}

pub fn parse_version_line(line: &str) -> Option<VersionLine> {
    let idx = line.find("Version:")?;
    let rest = strip_ansi(&line[idx + "Version:".len()..]);
    let rest = rest.trim();

    let (version, loader) = match rest.split_once("with ") {
        Some((v, l)) => (v.trim().to_string(), l.trim().to_string()),
        None => {
            let end = rest
                .find([' ', '(', '【'])
                .unwrap_or(rest.len());
            (rest[..end].to_string(), String::new())
        }
    };
    if version.is_empty() {
        return None;
    }
    Some(VersionLine { version, loader })
}

/// `"... 3 players online"` or `"... 3/20 players online"`.
pub fn parse_players_online(line: &str) -> Option<u32> {
    if !line.contains("players online") {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        if pair[1] != "players" {
            return None;
        }
        let count = pair[0].split('/').next().unwrap_or_default();
        count.parse::<u32>().ok()
    })
}

/// Newest-first scan over `lines` (oldest first), returning the most recent
/// version line and player count line.
pub fn scan_recent(lines: &[String]) -> (Option<VersionLine>, Option<u32>) {
    let mut version = None;
    let mut players = None;
    for line in lines.iter().rev() {
        if version.is_none() {
            version = parse_version_line(line);
        }
        if players.is_none() {
            players = parse_players_online(line);
        }
        if version.is_some() && players.is_some() {
            break;
        }
    }
    (version, players)
}

pub async fn read_max_players(server_path: &Path) -> Option<u32> {
    let props = server_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("server.properties");
    let text = tokio::fs::read_to_string(&props).await.ok()?;
    text.lines().find_map(|line| {
        let value = line.trim().strip_prefix("max-players=")?;
        value.trim().parse::<u32>().ok().filter(|v| *v > 0)
    })
}

pub struct InfoInputs<'a> {
    pub config: &'a ConfigStore,
    pub recent_lines: Vec<String>,
    pub roster_count: usize,
    pub session: SessionStatus,
}

pub async fn collect(inputs: InfoInputs<'_>) -> ServerInfo {
    let cfg = inputs.config.snapshot();
    let mut info = ServerInfo {
        version: UNKNOWN_VERSION.to_string(),
        loader_version: String::new(),
        start_time: inputs.session.started_at.clone().unwrap_or_default(),
        player_count: u32::try_from(inputs.roster_count).unwrap_or(u32::MAX),
        max_players: DEFAULT_MAX_PLAYERS,
        uptime: inputs.session.uptime_secs,
    };
    if !cfg.version.trim().is_empty() {
        info.version = cfg.version.clone();
        info.loader_version = cfg.loader_version.clone();
    }

    if let Some(path) = cfg.server_path() {
        if let Some(max) = read_max_players(&path).await {
            info.max_players = max;
        }
    }

    let (version, players) = scan_recent(&inputs.recent_lines);
    if let Some(count) = players {
        info.player_count = count;
    }
    if let Some(found) = version {
        info.version = found.version;
        if !found.loader.is_empty() {
            info.loader_version = found.loader;
        }
        if let Err(err) = inputs
            .config
            .record_versions(&info.version, &info.loader_version)
            .await
        {
            tracing::warn!(error = %crate::support::format_error_chain(&err), "failed to persist server version");
        }
    }

    info
}
