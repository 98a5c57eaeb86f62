//! In-process tracking of actions being executed.

use crate::action::{deadline_after, now_millis, Action, ActionId};
use crate::metrics;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tracking data for one in-flight action.
#[derive(Debug, Clone)]
pub struct ExecutionEntry {
    /// Fires to stop the executor and the running handler.
    pub cancel: CancellationToken,
    /// Unix millis when execution started.
    pub started_at: i64,
    pub timeout: Duration,
    /// Last known state of the action.
    pub snapshot: Action,
}

impl ExecutionEntry {
    pub fn deadline_ms(&self) -> i64 {
        deadline_after(self.started_at, self.timeout)
    }

    pub fn is_overdue(&self, now_ms: i64) -> bool {
        now_ms > self.deadline_ms()
    }
}

/// In-flight actions keyed by id.
///
/// The lock is never held across an await or a store call.
#[derive(Default)]
pub struct ExecutionRegistry {
    entries: Mutex<HashMap<ActionId, ExecutionEntry>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `action`, returning the token that cancels it.
    ///
    /// The token is a child of `parent`. Returns `None` if the id is already
    /// tracked.
    pub fn register(
        &self,
        action: &Action,
        timeout: Duration,
        parent: &CancellationToken,
    ) -> Option<CancellationToken> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&action.id) {
            return None;
        }
        let cancel = parent.child_token();
        entries.insert(
            action.id,
            ExecutionEntry {
                cancel: cancel.clone(),
                started_at: action.process_started_at.unwrap_or_else(now_millis),
                timeout,
                snapshot: action.clone(),
            },
        );
        metrics::set_in_flight(entries.len());
        Some(cancel)
    }

    /// Replace the stored snapshot; the deadline is reset when the action's
    /// start time changed.
    pub fn update_snapshot(&self, action: &Action) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&action.id) {
            if let Some(started_at) = action.process_started_at {
                entry.started_at = started_at;
            }
            entry.snapshot = action.clone();
        }
    }

    pub fn remove(&self, id: ActionId) -> Option<ExecutionEntry> {
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.remove(&id);
        metrics::set_in_flight(entries.len());
        removed
    }

    /// Remove and return every entry past its deadline at `now_ms`.
    pub fn take_overdue(&self, now_ms: i64) -> Vec<(ActionId, ExecutionEntry)> {
        let mut entries = self.entries.lock().unwrap();
        let overdue: Vec<ActionId> = entries
            .iter()
            .filter(|(_, entry)| entry.is_overdue(now_ms))
            .map(|(id, _)| *id)
            .collect();
        let taken = overdue
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
            .collect();
        metrics::set_in_flight(entries.len());
        taken
    }

    /// Drop entries whose snapshot is already done.
    pub fn evict_done(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.snapshot.is_done);
        metrics::set_in_flight(entries.len());
        before - entries.len()
    }

    /// Signal cancellation to every tracked action.
    pub fn cancel_all(&self) {
        for entry in self.entries.lock().unwrap().values() {
            entry.cancel.cancel();
        }
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.entries.lock().unwrap().contains_key(&id)
    }

    pub fn get(&self, id: ActionId) -> Option<ExecutionEntry> {
        self.entries.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;

    fn make_action(id: i64, started_at: i64) -> Action {
        Action {
            id: ActionId(id),
            text: format!("Job{}", id),
            kind: ActionKind::Handler,
            source: None,
            group: None,
            priority: 0,
            created_at: started_at,
            process_started_at: Some(started_at),
            duration_ms: 0,
            is_started: true,
            is_done: false,
            attempt_count: 0,
            error: None,
            timeout_ms: None,
        }
    }

    #[test]
    fn test_refuses_second_registration() {
        let registry = ExecutionRegistry::new();
        let root = CancellationToken::new();
        let action = make_action(1, 1_000);

        assert!(registry.register(&action, Duration::from_secs(1), &root).is_some());
        assert!(registry.register(&action, Duration::from_secs(1), &root).is_none());
        assert_eq!(registry.len(), 1);

        registry.remove(action.id);
        assert!(registry.register(&action, Duration::from_secs(1), &root).is_some());
    }

    #[test]
    fn test_take_overdue() {
        let registry = ExecutionRegistry::new();
        let root = CancellationToken::new();
        registry.register(&make_action(1, 1_000), Duration::from_millis(100), &root);
        registry.register(&make_action(2, 1_000), Duration::from_secs(60), &root);

        assert!(registry.take_overdue(1_100).is_empty());

        let overdue = registry.take_overdue(1_101);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].0, ActionId(1));
        assert!(!registry.contains(ActionId(1)));
        assert!(registry.contains(ActionId(2)));
    }

    #[test]
    fn test_parent_cancellation_reaches_entries() {
        let registry = ExecutionRegistry::new();
        let root = CancellationToken::new();
        let token = registry
            .register(&make_action(1, 0), Duration::from_secs(1), &root)
            .unwrap();

        root.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_all_does_not_cancel_parent() {
        let registry = ExecutionRegistry::new();
        let root = CancellationToken::new();
        let token = registry
            .register(&make_action(1, 0), Duration::from_secs(1), &root)
            .unwrap();

        registry.cancel_all();
        assert!(token.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_evict_done() {
        let registry = ExecutionRegistry::new();
        let root = CancellationToken::new();
        let mut done = make_action(1, 0);
        registry.register(&done, Duration::from_secs(1), &root);
        registry.register(&make_action(2, 0), Duration::from_secs(1), &root);

        done.is_done = true;
        registry.update_snapshot(&done);

        assert_eq!(registry.evict_done(), 1);
        assert!(!registry.contains(ActionId(1)));
        assert!(registry.contains(ActionId(2)));
    }

    #[test]
    fn test_update_snapshot_moves_deadline() {
        let registry = ExecutionRegistry::new();
        let root = CancellationToken::new();
        let mut action = make_action(1, 1_000);
        registry.register(&action, Duration::from_millis(100), &root);

        action.process_started_at = Some(5_000);
        registry.update_snapshot(&action);

        assert_eq!(registry.get(ActionId(1)).unwrap().deadline_ms(), 5_100);
    }

    #[test]
    fn test_huge_timeout_never_overdue() {
        let registry = ExecutionRegistry::new();
        let root = CancellationToken::new();
        let mut action = make_action(1, now_millis());
        action.timeout_ms = Some(i64::MAX);
        let timeout = action.effective_timeout(Duration::from_secs(60));
        assert!(registry.register(&action, timeout, &root).is_some());

        assert_eq!(registry.get(ActionId(1)).unwrap().deadline_ms(), i64::MAX);
        assert!(registry.take_overdue(now_millis()).is_empty());
        assert_eq!(registry.len(), 1);
    }
}
