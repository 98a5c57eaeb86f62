//! Parsing of `command` action text.
//!
//! `[reports] DELETE FROM daily WHERE day < date('now') @timeOut = 60`
//! selects the `reports` connection, runs the statement without the
//! `@timeOut` parameter and gives it 60 seconds.

use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

/// Deadline for command actions that carry neither `@timeOut` nor `timeout_ms`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

lazy_static! {
    static ref CONNECTION_PREFIX: Regex = Regex::new(r"(?s)^\s*\[([^\]]*)\]\s*(.*)$").unwrap();
    static ref TIMEOUT_PARAM: Regex = Regex::new(r"(?i),?\s*@timeout\s*=\s*(\d+)").unwrap();
}

/// A command action split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Connection name from the `[name]` prefix, empty for the default connection.
    pub connection: String,
    /// Command text with the prefix and `@timeOut` removed.
    pub command: String,
    /// Execution deadline.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Parse `text`, using `timeout_ms` when no inline `@timeOut` is given.
    pub fn parse(text: &str, timeout_ms: Option<i64>) -> Self {
        let (connection, body) = match CONNECTION_PREFIX.captures(text) {
            Some(caps) => (
                caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
                caps.get(2).map_or("", |m| m.as_str()),
            ),
            None => (String::new(), text),
        };

        let inline_secs = TIMEOUT_PARAM
            .captures(body)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());

        let timeout = match (inline_secs, timeout_ms) {
            (Some(secs), _) => Duration::from_secs(secs),
            (None, Some(ms)) if ms > 0 => Duration::from_millis(ms as u64),
            _ => DEFAULT_COMMAND_TIMEOUT,
        };

        let command = TIMEOUT_PARAM.replace_all(body, "").trim().to_string();

        Self {
            connection,
            command,
            timeout,
        }
    }

    pub fn uses_default_connection(&self) -> bool {
        self.connection.is_empty()
    }
}
