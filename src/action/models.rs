//! Data models for queued actions.
//!
//! Defines the action record, its identity, kinds, and the builder used by
//! producers to enqueue new work.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Store-assigned identity of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub i64);

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the text of an action is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// `[connection] command text` run against a named data source.
    Command,
    /// `FunctionName @p1 = v1, ...` dispatched to a registered handler.
    Handler,
    /// A kind this process does not know how to run (kept so the row can
    /// be failed with a descriptive error instead of being dropped).
    Unknown(String),
}

impl ActionKind {
    pub fn as_db_str(&self) -> &str {
        match self {
            ActionKind::Command => "command",
            ActionKind::Handler => "handler",
            ActionKind::Unknown(kind) => kind,
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "command" => ActionKind::Command,
            "handler" => ActionKind::Handler,
            other => ActionKind::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A queued unit of work and its lifecycle state.
///
/// Equality and hashing consider `id` only: two copies of the same record
/// with diverging local fields still refer to the same work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// Handler invocation or command text.
    pub text: String,
    pub kind: ActionKind,
    pub source: Option<String>,
    pub group: Option<String>,
    /// Claim order key, lower values are claimed first.
    pub priority: i32,
    /// When the action was enqueued (Unix millis)
    pub created_at: i64,
    /// When the current/last execution started (Unix millis)
    pub process_started_at: Option<i64>,
    /// Wall time of the last execution span
    pub duration_ms: i64,
    pub is_started: bool,
    pub is_done: bool,
    pub attempt_count: u8,
    /// Last failure description, `None` once the action succeeded.
    pub error: Option<String>,
    /// Per-action override of the default execution timeout.
    pub timeout_ms: Option<i64>,
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Action {}

impl Hash for Action {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Action {
    /// True while the action is claimed by an executor.
    pub fn is_in_flight(&self) -> bool {
        self.is_started && !self.is_done
    }

    /// First whitespace-delimited token of the text.
    ///
    /// For handler actions this is the registered handler name.
    pub fn handler_name(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or_default()
    }

    /// The per-action timeout if set and positive, otherwise `default`.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        match self.timeout_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            _ => default,
        }
    }

    /// Milliseconds since the action started executing (or was created,
    /// if it never started).
    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.process_started_at.unwrap_or(self.created_at)).max(0)
    }
}

/// A new action as submitted by a producer, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAction {
    pub text: String,
    pub kind: ActionKind,
    pub source: Option<String>,
    pub group: Option<String>,
    pub priority: i32,
    pub timeout_ms: Option<i64>,
}

impl NewAction {
    pub fn new(text: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            text: text.into(),
            kind,
            source: None,
            group: None,
            priority: 0,
            timeout_ms: None,
        }
    }

    /// `FunctionName @p1 = v1, @p2 = "v2"`
    pub fn handler(text: impl Into<String>) -> Self {
        Self::new(text, ActionKind::Handler)
    }

    /// `[connectionName] command text`
    pub fn command(text: impl Into<String>) -> Self {
        Self::new(text, ActionKind::Command)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX));
        self
    }
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `started_at + timeout` in Unix millis, saturating at `i64::MAX`.
pub fn deadline_after(started_at: i64, timeout: Duration) -> i64 {
    started_at.saturating_add(i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn make_action(id: i64, text: &str) -> Action {
        Action {
            id: ActionId(id),
            text: text.to_string(),
            kind: ActionKind::Handler,
            source: None,
            group: None,
            priority: 0,
            created_at: 1_000,
            process_started_at: None,
            duration_ms: 0,
            is_started: false,
            is_done: false,
            attempt_count: 0,
            error: None,
            timeout_ms: None,
        }
    }

    #[test]
    fn test_equality_uses_id_only() {
        let a = make_action(7, "Foo @a = 1");
        let mut b = make_action(7, "Bar");
        b.is_done = true;
        b.attempt_count = 3;

        assert_eq!(a, b);
        assert_ne!(a, make_action(8, "Foo @a = 1"));

        let set: HashSet<Action> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_kind_db_round_trip_keeps_unknown() {
        assert_eq!(ActionKind::from_db_str("command"), ActionKind::Command);
        assert_eq!(ActionKind::from_db_str("handler"), ActionKind::Handler);

        let unknown = ActionKind::from_db_str("python");
        assert_eq!(unknown, ActionKind::Unknown("python".to_string()));
        assert_eq!(unknown.as_db_str(), "python");
    }

    #[test]
    fn test_handler_name_is_first_token() {
        assert_eq!(make_action(1, "SendMail @to = x").handler_name(), "SendMail");
        assert_eq!(make_action(1, "  Cleanup").handler_name(), "Cleanup");
        assert_eq!(make_action(1, "").handler_name(), "");
    }

    #[test]
    fn test_effective_timeout() {
        let default = Duration::from_secs(1800);
        let mut action = make_action(1, "Foo");
        assert_eq!(action.effective_timeout(default), default);

        action.timeout_ms = Some(0);
        assert_eq!(action.effective_timeout(default), default);

        action.timeout_ms = Some(100);
        assert_eq!(action.effective_timeout(default), Duration::from_millis(100));
    }

    #[test]
    fn test_elapsed_prefers_process_start() {
        let mut action = make_action(1, "Foo");
        assert_eq!(action.elapsed_ms(1_500), 500);

        action.process_started_at = Some(1_400);
        assert_eq!(action.elapsed_ms(1_500), 100);
        assert_eq!(action.elapsed_ms(1_000), 0);
    }

    #[test]
    fn test_new_action_builder() {
        let action = NewAction::command("[reports] delete from t")
            .with_priority(-1)
            .with_group("nightly")
            .with_source("cron")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(action.kind, ActionKind::Command);
        assert_eq!(action.priority, -1);
        assert_eq!(action.group.as_deref(), Some("nightly"));
        assert_eq!(action.source.as_deref(), Some("cron"));
        assert_eq!(action.timeout_ms, Some(5_000));
    }

    #[test]
    fn test_deadline_saturates() {
        assert_eq!(deadline_after(1_000, Duration::from_millis(250)), 1_250);
        assert_eq!(deadline_after(1_000, Duration::from_millis(i64::MAX as u64)), i64::MAX);
        assert_eq!(deadline_after(0, Duration::MAX), i64::MAX);

        let action = NewAction::handler("Foo").with_timeout(Duration::MAX);
        assert_eq!(action.timeout_ms, Some(i64::MAX));
    }
}
