use specta::Type;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_STOPPED: &str = "stopped";

/// Identity of one lifetime of the supervised server process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub enum SessionPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl SessionPhase {
    pub fn is_running(self) -> bool {
        matches!(self, SessionPhase::Running)
    }

    /// Two-valued status used on the client wire.
    pub fn wire_status(self) -> &'static str {
        if self.is_running() {
            STATUS_RUNNING
        } else {
            STATUS_STOPPED
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Type)]
pub struct SessionStatus {
    pub id: Option<SessionId>,
    pub phase: SessionPhase,
    pub pid: Option<u32>,
    /// Local wall-clock time, `%Y-%m-%d %H:%M:%S`.
    pub started_at: Option<String>,
    pub uptime_secs: u64,
    pub last_exit_code: Option<i32>,
}

/// Roster entry. `name` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct Player {
    pub name: String,
    pub xuid: String,
    /// Set when the reputation service flagged the player but enforcement is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputation: Option<String>,
}

impl Player {
    pub fn new(name: impl Into<String>, xuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xuid: xuid.into(),
            reputation: None,
        }
    }

    pub fn flagged(mut self, reason: impl Into<String>) -> Self {
        self.reputation = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub loader_version: String,
    pub start_time: String,
    pub player_count: u32,
    pub max_players: u32,
    pub uptime: u64,
}

/// Inbound envelope. Unknown fields are ignored so older clients keep working.
#[derive(Debug, Clone, Default, serde::Deserialize, Type)]
pub struct ClientMessage {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub content: String,
}

/// Outbound envelope: one JSON object per logical message, only the
/// populated fields are serialized.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<Player>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
}

impl ServerMessage {
    pub fn output(line: impl Into<String>) -> Self {
        Self {
            output: Some(line.into()),
            ..Self::default()
        }
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn players(players: Vec<Player>) -> Self {
        Self {
            players: Some(players),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn advisory(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn console_history(text: impl Into<String>) -> Self {
        Self {
            command: Some("getConsoleHistory".to_string()),
            file_content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn panel_config(raw: impl Into<String>) -> Self {
        Self {
            command: Some("getPanelConfig".to_string()),
            file_content: Some(raw.into()),
            ..Self::default()
        }
    }

    pub fn server_info(info: ServerInfo) -> Self {
        Self {
            server_info: Some(info),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_non_empty() {
        let id = SessionId::new();
        assert!(!id.0.is_empty());
        assert_ne!(id, SessionId::new());
    }

    #[test]
    fn only_running_phase_reports_running() {
        assert_eq!(SessionPhase::Running.wire_status(), STATUS_RUNNING);
        for phase in [
            SessionPhase::Stopped,
            SessionPhase::Starting,
            SessionPhase::Stopping,
            SessionPhase::Crashed,
        ] {
            assert_eq!(phase.wire_status(), STATUS_STOPPED);
        }
    }

    #[test]
    fn output_message_serializes_only_output() {
        let json = serde_json::to_string(&ServerMessage::output("hello")).unwrap();
        assert_eq!(json, r#"{"output":"hello"}"#);
    }

    #[test]
    fn empty_roster_is_still_serialized() {
        let json = serde_json::to_string(&ServerMessage::players(Vec::new())).unwrap();
        assert_eq!(json, r#"{"players":[]}"#);
    }

    #[test]
    fn player_annotation_is_omitted_when_absent() {
        let plain = serde_json::to_value(Player::new("Alice", "123")).unwrap();
        assert_eq!(plain, serde_json::json!({"name": "Alice", "xuid": "123"}));

        let flagged = serde_json::to_value(Player::new("Mallory", "9").flagged("griefing")).unwrap();
        assert_eq!(flagged["reputation"], "griefing");
    }

    #[test]
    fn client_message_tolerates_missing_and_unknown_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"command":"status","filePath":"x"}"#).unwrap();
        assert_eq!(msg.command, "status");
        assert!(msg.content.is_empty());
    }

    #[test]
    fn history_reply_uses_file_content() {
        let v = serde_json::to_value(ServerMessage::console_history("a\nb\n")).unwrap();
        assert_eq!(v["fileContent"], "a\nb\n");
        assert_eq!(v["command"], "getConsoleHistory");
    }
}
