use std::collections::HashSet;

use anyhow::Context;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Joined { name: String, xuid: String },
    Spawned { name: String, xuid: String },
    Left { name: String },
    Kicked { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Joined,
    Spawned,
    Left,
    Kicked,
}

/// Operator-supplied rule from the panel config (`PlayerPatterns`).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PatternRule {
    pub kind: EventKind,
    pub pattern: String,
}

const BUILTIN_RULES: &[(EventKind, &str)] = &[
    (
        EventKind::Joined,
        r"Player connected:\s*(?P<name>[^,]+)(?:,\s*xuid:\s*(?P<xuid>[^\s,]+))?",
    ),
    (
        EventKind::Spawned,
        r"Player Spawned:\s*(?P<name>[^\s]+)\s+xuid:\s*(?P<xuid>[^\s,]+)",
    ),
    (
        EventKind::Left,
        r"Player disconnected:\s*(?P<name>[^,]+)(?:,\s*xuid:\s*(?P<xuid>[^\s,]+))?",
    ),
    (EventKind::Left, r"Player\s+(?P<name>[^\s]+)\s+left\s+the\s+game"),
    (EventKind::Left, r"(?P<name>[^\s]+)\s+left\s+the\s+game"),
    (EventKind::Kicked, r"Kicked player:\s*(?P<name>[^\s]+)"),
    (EventKind::Kicked, r"Player\s+(?P<name>[^\s]+)\s+was\s+kicked"),
];

const EXIT_TOKENS: [&str; 2] = ["left", "disconnected"];

#[derive(Debug)]
struct Rule {
    kind: EventKind,
    re: Regex,
}

impl Rule {
    fn compile(kind: EventKind, pattern: &str) -> anyhow::Result<Self> {
        let re = Regex::new(pattern).with_context(|| format!("invalid player pattern: {pattern}"))?;
        if !re.capture_names().any(|n| n == Some("name")) {
            anyhow::bail!("player pattern has no (?P<name>...) group: {pattern}");
        }
        Ok(Self { kind, re })
    }

    fn apply(&self, line: &str) -> Option<PlayerEvent> {
        let caps = self.re.captures(line)?;
        let name = caps.name("name")?.as_str().trim();
        if name.is_empty() {
            return None;
        }
        let name = name.to_string();
        let xuid = caps
            .name("xuid")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        Some(match self.kind {
            EventKind::Joined => PlayerEvent::Joined { name, xuid },
            EventKind::Spawned => PlayerEvent::Spawned { name, xuid },
            EventKind::Left => PlayerEvent::Left { name },
            EventKind::Kicked => PlayerEvent::Kicked { name },
        })
    }
}

/// Ordered cascade of line classifiers. The first matching rule wins; the
/// generic exit heuristic runs only when no rule matched.
#[derive(Debug)]
pub struct EventParser {
    rules: Vec<Rule>,
}

impl EventParser {
    pub fn new(extra: &[PatternRule]) -> anyhow::Result<Self> {
        let mut rules = Vec::with_capacity(BUILTIN_RULES.len() + extra.len());
        for (kind, pattern) in BUILTIN_RULES {
            rules.push(Rule::compile(*kind, pattern)?);
        }
        for rule in extra {
            rules.push(Rule::compile(rule.kind, &rule.pattern)?);
        }
        Ok(Self { rules })
    }

    /// `known_names` is only called when the fallback needs it.
    pub fn parse<F>(&self, line: &str, known_names: F) -> Option<PlayerEvent>
    where
        F: FnOnce() -> HashSet<String>,
    {
        for (idx, rule) in self.rules.iter().enumerate() {
            if let Some(ev) = rule.apply(line) {
                tracing::debug!(rule = idx, event = ?ev, "player event matched");
                return Some(ev);
            }
        }

        let ev = fallback_exit(line, known_names)?;
        tracing::debug!(event = ?ev, "player exit matched by fallback");
        Some(ev)
    }
}

fn fallback_exit<F>(line: &str, known_names: F) -> Option<PlayerEvent>
where
    F: FnOnce() -> HashSet<String>,
{
    if !EXIT_TOKENS.iter().any(|t| line.contains(t)) {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }
    let known = known_names();
    if known.is_empty() {
        return None;
    }
    tokens.windows(2).find_map(|pair| {
        (EXIT_TOKENS.contains(&pair[1]) && known.contains(pair[0])).then(|| PlayerEvent::Left {
            name: pair[0].to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> EventParser {
        EventParser::new(&[]).unwrap()
    }

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn parse(line: &str) -> Option<PlayerEvent> {
        parser().parse(line, HashSet::new)
    }

    #[test]
    fn connect_line_with_xuid() {
        assert_eq!(
            parse("Player connected: Alice, xuid: 123"),
            Some(PlayerEvent::Joined {
                name: "Alice".into(),
                xuid: "123".into()
            })
        );
    }

    #[test]
    fn connect_line_without_xuid_and_with_prefix() {
        assert_eq!(
            parse("[2024-01-01 10:00:00:123 INFO] Player connected: Some Body "),
            Some(PlayerEvent::Joined {
                name: "Some Body".into(),
                xuid: String::new()
            })
        );
    }

    #[test]
    fn spawn_line_carries_xuid() {
        assert_eq!(
            parse("[INFO] Player Spawned: Steve xuid: 2535400000000000, pfid: abc"),
            Some(PlayerEvent::Spawned {
                name: "Steve".into(),
                xuid: "2535400000000000".into()
            })
        );
    }

    #[test]
    fn disconnect_variants() {
        for line in [
            "Player disconnected: Alice, xuid: 123",
            "Player Alice left the game",
            "Alice left the game",
        ] {
            assert_eq!(
                parse(line),
                Some(PlayerEvent::Left {
                    name: "Alice".into()
                }),
                "{line}"
            );
        }
    }

    #[test]
    fn kick_variants() {
        for line in ["Kicked player: Eve", "Player Eve was kicked for spam"] {
            assert_eq!(
                parse(line),
                Some(PlayerEvent::Kicked { name: "Eve".into() }),
                "{line}"
            );
        }
    }

    #[test]
    fn unrecognized_line_yields_nothing() {
        assert_eq!(parse("Server started."), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn fallback_removes_only_known_names() {
        let p = parser();
        assert_eq!(
            p.parse("Bob disconnected unexpectedly", || names(&["Bob"])),
            Some(PlayerEvent::Left { name: "Bob".into() })
        );
        assert_eq!(p.parse("Carol left", || names(&["Bob"])), None);
        assert_eq!(p.parse("Carol left", HashSet::new), None);
    }

    #[test]
    fn fallback_checks_every_exit_token() {
        let p = parser();
        assert_eq!(
            p.parse("note: Zed left early, then Bob left too", || names(&["Bob"])),
            Some(PlayerEvent::Left { name: "Bob".into() })
        );
    }

    #[test]
    fn fallback_skips_roster_snapshot_for_unrelated_lines() {
        let p = parser();
        let ev = p.parse("Level loaded", || panic!("snapshot should not be taken"));
        assert_eq!(ev, None);
    }

    #[test]
    fn specific_patterns_win_over_fallback() {
        let p = parser();
        assert_eq!(
            p.parse("Player disconnected: Bob, xuid: 9", || names(&["disconnected:"])),
            Some(PlayerEvent::Left { name: "Bob".into() })
        );
    }

    #[test]
    fn extra_rules_extend_the_table() {
        let p = EventParser::new(&[PatternRule {
            kind: EventKind::Kicked,
            pattern: r"Removed (?P<name>\w+) from the server".into(),
        }])
        .unwrap();
        assert_eq!(
            p.parse("Removed Dave from the server", HashSet::new),
            Some(PlayerEvent::Kicked {
                name: "Dave".into()
            })
        );
    }

    #[test]
    fn extra_rule_without_name_group_is_rejected() {
        let err = EventParser::new(&[PatternRule {
            kind: EventKind::Left,
            pattern: r"(\w+) quit".into(),
        }])
        .unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn invalid_extra_rule_is_rejected() {
        assert!(
            EventParser::new(&[PatternRule {
                kind: EventKind::Joined,
                pattern: "(?P<name>".into(),
            }])
            .is_err()
        );
    }
}
