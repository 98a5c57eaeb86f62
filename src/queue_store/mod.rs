//! Durable storage for queued actions.
//!
//! [`QueueStore`] is the boundary the execution engine consumes. Every call
//! is atomic on its own; the engine never assumes a transaction spanning
//! several calls. [`SqliteQueueStore`] is the bundled implementation.

mod schema;
mod sqlite;

pub use schema::ACTION_QUEUE_VERSIONED_SCHEMAS;
pub use sqlite::{SqliteQueueStore, DEFAULT_ACTIVITY_WINDOW};

use crate::action::{Action, ActionId, NewAction};
use anyhow::Result;
use serde::Serialize;

/// Error recorded on pending rows suppressed as duplicates during a claim.
pub const DUPLICATE_ERROR: &str = "Doubles";

/// Error recorded when an in-flight action is cancelled after its timeout.
pub const TIMEOUT_CANCEL_ERROR: &str = "Cancel ended action after timeout";

/// Row counts by lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub started: u64,
    /// Finished without error.
    pub done: u64,
    /// Finished with an error, duplicates excluded.
    pub failed: u64,
    pub duplicates: u64,
}

/// Storage operations for the action queue.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait QueueStore: Send + Sync {
    // === Claiming ===

    /// Claim up to `max_count` pending actions for execution.
    ///
    /// Returns nothing while at least `2 * max_count` actions are in flight
    /// and were started recently. Otherwise picks one winner per
    /// `(text, kind)` group, lowest `(priority, id)` first, marks winners as
    /// started and marks every other pending row of a winning group as done
    /// with [`DUPLICATE_ERROR`]. Rows already started are never touched.
    fn claim(&self, max_count: usize) -> Result<Vec<Action>>;

    // === Producers ===

    /// Insert a new pending action.
    fn insert(&self, action: NewAction) -> Result<ActionId>;

    /// Insert several actions in one transaction, returning ids in input order.
    fn insert_batch(&self, actions: &[NewAction]) -> Result<Vec<ActionId>>;

    fn get_by_id(&self, id: ActionId) -> Result<Option<Action>>;

    /// Overwrite every mutable field of an existing action.
    fn update(&self, action: &Action) -> Result<()>;

    // === Execution bookkeeping ===

    /// Set `is_started`, clear `is_done` and stamp `process_started_at`.
    fn mark_started(&self, id: ActionId) -> Result<()>;

    /// Persist attempt progress without changing lifecycle flags.
    fn record_attempt(&self, id: ActionId, attempt_count: u8, error: Option<String>)
        -> Result<()>;

    /// Persist the end of an execution span.
    ///
    /// With `is_done` the row becomes terminal. Without it the row is
    /// released back to pending, unless it is already terminal.
    fn mark_ended(
        &self,
        id: ActionId,
        duration_ms: i64,
        error: Option<String>,
        is_done: bool,
    ) -> Result<()>;

    /// Terminate a not yet finished action with [`TIMEOUT_CANCEL_ERROR`].
    ///
    /// Returns false when the action was already done or does not exist.
    fn cancel(&self, id: ActionId) -> Result<bool>;

    // === Maintenance ===

    /// Return every started, unfinished row to pending and clear its error.
    /// Used at startup to recover rows orphaned by a crashed process.
    fn clear_stale_started(&self) -> Result<usize>;

    /// Delete finished rows created more than `days` days ago.
    fn purge_completed_older_than(&self, days: u32) -> Result<usize>;

    fn stats(&self) -> Result<QueueStats>;
}
