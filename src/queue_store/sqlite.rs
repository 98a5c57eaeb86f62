//! SQLite implementation of [`QueueStore`].

use super::schema::ACTION_QUEUE_VERSIONED_SCHEMAS;
use super::{QueueStats, QueueStore, DUPLICATE_ERROR, TIMEOUT_CANCEL_ERROR};
use crate::action::{now_millis, Action, ActionId, ActionKind, NewAction};
use crate::sqlite_persistence::{open_versioned, BUSY_TIMEOUT};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Started rows older than this no longer count as in flight for claim
/// backpressure.
pub const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(10 * 60);

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

const ACTION_COLUMNS: &str = "id, text, kind, source, group_name, priority, created_at, \
     process_started_at, duration_ms, is_started, is_done, attempt_count, error, timeout_ms";

/// SQLite-backed queue store.
///
/// Several instances (in one or several processes) may share a database
/// file. Claims run in `BEGIN IMMEDIATE` transactions, so concurrent callers
/// are serialized by SQLite's write lock.
#[derive(Clone)]
pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
    activity_window: Duration,
}

impl SqliteQueueStore {
    /// Open or create the queue database at `db_path`, migrating it to the
    /// latest schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(&db_path, ACTION_QUEUE_VERSIONED_SCHEMAS, "action queue")?;
        // WAL lets readers proceed while a claim holds the write lock
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))
            .context("Failed to enable WAL journal")?;

        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
            activity_window: DEFAULT_ACTIVITY_WINDOW,
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        ACTION_QUEUE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
            activity_window: DEFAULT_ACTIVITY_WINDOW,
        })
    }

    pub fn with_activity_window(mut self, activity_window: Duration) -> Self {
        self.activity_window = activity_window;
        self
    }

    fn row_to_action(row: &rusqlite::Row) -> rusqlite::Result<Action> {
        Ok(Action {
            id: ActionId(row.get("id")?),
            text: row.get("text")?,
            kind: ActionKind::from_db_str(&row.get::<_, String>("kind")?),
            source: row.get("source")?,
            group: row.get("group_name")?,
            priority: row.get("priority")?,
            created_at: row.get("created_at")?,
            process_started_at: row.get("process_started_at")?,
            duration_ms: row.get("duration_ms")?,
            is_started: row.get("is_started")?,
            is_done: row.get("is_done")?,
            attempt_count: row
                .get::<_, i64>("attempt_count")?
                .clamp(0, u8::MAX as i64) as u8,
            error: row.get("error")?,
            timeout_ms: row.get("timeout_ms")?,
        })
    }

    fn insert_with(conn: &Connection, action: &NewAction, created_at: i64) -> Result<ActionId> {
        conn.execute(
            "INSERT INTO action_queue (text, kind, source, group_name, priority, created_at, timeout_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                action.text,
                action.kind.as_db_str(),
                action.source,
                action.group,
                action.priority,
                created_at,
                action.timeout_ms,
            ],
        )?;
        Ok(ActionId(conn.last_insert_rowid()))
    }

    fn get_with(conn: &Connection, id: ActionId) -> Result<Option<Action>> {
        let action = conn
            .query_row(
                &format!("SELECT {} FROM action_queue WHERE id = ?1", ACTION_COLUMNS),
                params![id.0],
                Self::row_to_action,
            )
            .optional()?;
        Ok(action)
    }
}

impl QueueStore for SqliteQueueStore {
    fn claim(&self, max_count: usize) -> Result<Vec<Action>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin claim transaction")?;
        let now = now_millis();
        let window_start = now - self.activity_window.as_millis() as i64;

        let started: i64 = tx.query_row(
            "SELECT COUNT(*) FROM action_queue
             WHERE is_started = 1 AND is_done = 0 AND process_started_at >= ?1",
            params![window_start],
            |row| row.get(0),
        )?;
        if started >= 2 * max_count as i64 {
            debug!(
                "Claim skipped: {} actions in flight, limit {}",
                started,
                2 * max_count
            );
            tx.commit()?;
            return Ok(Vec::new());
        }

        let winners: Vec<(i64, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, text, kind FROM (
                     SELECT id, text, kind, priority,
                            ROW_NUMBER() OVER (PARTITION BY text, kind ORDER BY priority, id) AS rn
                     FROM action_queue
                     WHERE is_started = 0 AND is_done = 0
                 )
                 WHERE rn = 1
                 ORDER BY priority, id
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![max_count as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut claimed = Vec::with_capacity(winners.len());
        let mut duplicates = 0;
        for (id, text, kind) in &winners {
            tx.execute(
                "UPDATE action_queue
                 SET is_started = 1, is_done = 0, process_started_at = ?2
                 WHERE id = ?1 AND is_started = 0 AND is_done = 0",
                params![id, now],
            )?;
            duplicates += tx.execute(
                "UPDATE action_queue
                 SET is_done = 1, is_started = 0, error = ?4, duration_ms = 0
                 WHERE text = ?1 AND kind = ?2 AND id <> ?3
                   AND is_started = 0 AND is_done = 0",
                params![text, kind, id, DUPLICATE_ERROR],
            )?;
            if let Some(action) = Self::get_with(&tx, ActionId(*id))? {
                claimed.push(action);
            }
        }
        tx.commit().context("Failed to commit claim")?;

        if !claimed.is_empty() {
            debug!(
                "Claimed {} actions ({} duplicates suppressed)",
                claimed.len(),
                duplicates
            );
        }
        Ok(claimed)
    }

    fn insert(&self, action: NewAction) -> Result<ActionId> {
        let conn = self.conn.lock().unwrap();
        Self::insert_with(&conn, &action, now_millis())
    }

    fn insert_batch(&self, actions: &[NewAction]) -> Result<Vec<ActionId>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = now_millis();
        let ids = actions
            .iter()
            .map(|action| Self::insert_with(&tx, action, now))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(ids)
    }

    fn get_by_id(&self, id: ActionId) -> Result<Option<Action>> {
        let conn = self.conn.lock().unwrap();
        Self::get_with(&conn, id)
    }

    fn update(&self, action: &Action) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE action_queue SET
                text = ?2, kind = ?3, source = ?4, group_name = ?5, priority = ?6,
                process_started_at = ?7, duration_ms = ?8, is_started = ?9, is_done = ?10,
                attempt_count = ?11, error = ?12, timeout_ms = ?13
             WHERE id = ?1",
            params![
                action.id.0,
                action.text,
                action.kind.as_db_str(),
                action.source,
                action.group,
                action.priority,
                action.process_started_at,
                action.duration_ms,
                action.is_started,
                action.is_done,
                action.attempt_count,
                action.error,
                action.timeout_ms,
            ],
        )?;
        if updated == 0 {
            anyhow::bail!("Action {} not found", action.id);
        }
        Ok(())
    }

    fn mark_started(&self, id: ActionId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE action_queue SET is_started = 1, is_done = 0, process_started_at = ?2
             WHERE id = ?1",
            params![id.0, now_millis()],
        )?;
        Ok(())
    }

    fn record_attempt(
        &self,
        id: ActionId,
        attempt_count: u8,
        error: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE action_queue SET attempt_count = ?2, error = ?3 WHERE id = ?1",
            params![id.0, attempt_count, error],
        )?;
        Ok(())
    }

    fn mark_ended(
        &self,
        id: ActionId,
        duration_ms: i64,
        error: Option<String>,
        is_done: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE action_queue SET is_started = 0, is_done = ?2, duration_ms = ?3, error = ?4
             WHERE id = ?1 AND (?2 = 1 OR is_done = 0)",
            params![id.0, is_done, duration_ms, error],
        )?;
        Ok(())
    }

    fn cancel(&self, id: ActionId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE action_queue SET
                is_done = 1, is_started = 0, error = ?3,
                duration_ms = MAX(0, ?2 - COALESCE(process_started_at, created_at))
             WHERE id = ?1 AND is_done = 0",
            params![id.0, now_millis(), TIMEOUT_CANCEL_ERROR],
        )?;
        Ok(updated > 0)
    }

    fn clear_stale_started(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cleared = conn.execute(
            "UPDATE action_queue SET is_started = 0, process_started_at = NULL, error = NULL
             WHERE is_started = 1 AND is_done = 0",
            [],
        )?;
        if cleared > 0 {
            info!("Returned {} stale started actions to pending", cleared);
        }
        Ok(cleared)
    }

    fn purge_completed_older_than(&self, days: u32) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = now_millis() - days as i64 * MILLIS_PER_DAY;
        let deleted = conn.execute(
            "DELETE FROM action_queue WHERE is_done = 1 AND created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    fn stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            "SELECT
                COALESCE(SUM(is_done = 0 AND is_started = 0), 0),
                COALESCE(SUM(is_done = 0 AND is_started = 1), 0),
                COALESCE(SUM(is_done = 1 AND COALESCE(error, '') = ''), 0),
                COALESCE(SUM(is_done = 1 AND COALESCE(error, '') NOT IN ('', ?1)), 0),
                COALESCE(SUM(is_done = 1 AND error = ?1), 0)
             FROM action_queue",
            params![DUPLICATE_ERROR],
            |row| {
                Ok(QueueStats {
                    pending: row.get::<_, i64>(0)? as u64,
                    started: row.get::<_, i64>(1)? as u64,
                    done: row.get::<_, i64>(2)? as u64,
                    failed: row.get::<_, i64>(3)? as u64,
                    duplicates: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_store::ACTION_QUEUE_VERSIONED_SCHEMAS;
    use tempfile::tempdir;

    fn set_created_at(store: &SqliteQueueStore, id: ActionId, created_at: i64) {
        let conn = store.conn.lock().unwrap();
        conn.execute(
            "UPDATE action_queue SET created_at = ?2 WHERE id = ?1",
            params![id.0, created_at],
        )
        .unwrap();
    }

    #[test]
    fn test_create_new_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");

        let store = SqliteQueueStore::new(&db_path).unwrap();
        assert!(db_path.exists());

        let id = store.insert(NewAction::handler("Foo")).unwrap();
        drop(store);

        // reopening validates the schema and keeps the data
        let store = SqliteQueueStore::new(&db_path).unwrap();
        assert!(store.get_by_id(id).unwrap().is_some());
    }

    #[test]
    fn test_migrates_version_zero_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("old.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            ACTION_QUEUE_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
            conn.execute(
                "INSERT INTO action_queue (text, kind, created_at) VALUES ('Foo', 'handler', 1)",
                [],
            )
            .unwrap();
        }

        let store = SqliteQueueStore::new(&db_path).unwrap();
        let action = store.get_by_id(ActionId(1)).unwrap().unwrap();

        assert_eq!(action.text, "Foo");
        assert_eq!(action.timeout_ms, None);
    }

    #[test]
    fn test_insert_and_get() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store
            .insert(
                NewAction::command("[reports] VACUUM")
                    .with_priority(2)
                    .with_group("nightly")
                    .with_source("cron")
                    .with_timeout(Duration::from_secs(3)),
            )
            .unwrap();

        let action = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(action.kind, ActionKind::Command);
        assert_eq!(action.priority, 2);
        assert_eq!(action.group.as_deref(), Some("nightly"));
        assert_eq!(action.source.as_deref(), Some("cron"));
        assert_eq!(action.timeout_ms, Some(3_000));
        assert!(!action.is_started);
        assert!(!action.is_done);
        assert_eq!(action.attempt_count, 0);

        assert!(store.get_by_id(ActionId(999)).unwrap().is_none());
    }

    #[test]
    fn test_insert_batch_keeps_order() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let ids = store
            .insert_batch(&[NewAction::handler("A"), NewAction::handler("B")])
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(store.get_by_id(ids[0]).unwrap().unwrap().text, "A");
        assert_eq!(store.get_by_id(ids[1]).unwrap().unwrap().text, "B");
    }

    #[test]
    fn test_claim_orders_by_priority_then_id() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let low = store.insert(NewAction::handler("Low").with_priority(5)).unwrap();
        let first = store.insert(NewAction::handler("First")).unwrap();
        let second = store.insert(NewAction::handler("Second")).unwrap();

        let claimed = store.claim(2).unwrap();
        let ids: Vec<_> = claimed.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(claimed.iter().all(|a| a.is_started && a.process_started_at.is_some()));

        let claimed = store.claim(2).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, low);

        assert!(store.claim(2).unwrap().is_empty());
    }

    #[test]
    fn test_claim_suppresses_duplicates() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let ids: Vec<_> = (0..5)
            .map(|_| store.insert(NewAction::handler("Same @a = 1")).unwrap())
            .collect();
        // same text but another kind is a different group
        let other_kind = store.insert(NewAction::command("Same @a = 1")).unwrap();

        let claimed = store.claim(10).unwrap();
        let claimed_ids: Vec<_> = claimed.iter().map(|a| a.id).collect();
        assert_eq!(claimed_ids, vec![ids[0], other_kind]);

        for id in &ids[1..] {
            let action = store.get_by_id(*id).unwrap().unwrap();
            assert!(action.is_done);
            assert!(!action.is_started);
            assert_eq!(action.error.as_deref(), Some(DUPLICATE_ERROR));
        }
        assert_eq!(store.stats().unwrap().duplicates, 4);
    }

    #[test]
    fn test_duplicate_winner_respects_priority() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let _late = store.insert(NewAction::handler("Job")).unwrap();
        let urgent = store.insert(NewAction::handler("Job").with_priority(-1)).unwrap();

        let claimed = store.claim(1).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, urgent);
    }

    #[test]
    fn test_duplicates_never_touch_started_rows() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let running = store.insert(NewAction::handler("Job")).unwrap();
        assert_eq!(store.claim(1).unwrap()[0].id, running);

        let pending = store.insert(NewAction::handler("Job")).unwrap();
        let claimed = store.claim(1).unwrap();

        // the running copy is not a pending duplicate
        assert_eq!(claimed[0].id, pending);
        let running = store.get_by_id(running).unwrap().unwrap();
        assert!(running.is_in_flight());
        assert_eq!(running.error, None);
    }

    #[test]
    fn test_claim_backpressure() {
        let store = SqliteQueueStore::in_memory().unwrap();
        for i in 0..4 {
            store.insert(NewAction::handler(format!("Busy{}", i))).unwrap();
        }
        assert_eq!(store.claim(4).unwrap().len(), 4);

        store.insert(NewAction::handler("Waiting")).unwrap();
        // 4 in flight >= 2 * 2
        assert!(store.claim(2).unwrap().is_empty());
        // 4 in flight < 2 * 3
        assert_eq!(store.claim(3).unwrap().len(), 1);
    }

    #[test]
    fn test_backpressure_ignores_rows_outside_activity_window() {
        let store = SqliteQueueStore::in_memory()
            .unwrap()
            .with_activity_window(Duration::from_secs(60));
        for i in 0..2 {
            let id = store.insert(NewAction::handler(format!("Old{}", i))).unwrap();
            let mut action = store.get_by_id(id).unwrap().unwrap();
            action.is_started = true;
            action.process_started_at = Some(now_millis() - 5 * 60 * 1000);
            store.update(&action).unwrap();
        }

        store.insert(NewAction::handler("Fresh")).unwrap();
        assert_eq!(store.claim(1).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_ended_is_idempotent() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(NewAction::handler("Foo")).unwrap();
        store.claim(1).unwrap();

        store.mark_ended(id, 42, Some("boom".to_string()), true).unwrap();
        let first = store.get_by_id(id).unwrap().unwrap();
        store.mark_ended(id, 42, Some("boom".to_string()), true).unwrap();
        let second = store.get_by_id(id).unwrap().unwrap();

        assert!(second.is_done);
        assert!(!second.is_started);
        assert_eq!(second.duration_ms, 42);
        assert_eq!(second.error.as_deref(), Some("boom"));
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
        assert!(store.claim(1).unwrap().is_empty());
    }

    #[test]
    fn test_mark_ended_without_done_releases_row() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(NewAction::handler("Foo")).unwrap();
        store.claim(1).unwrap();

        store.mark_ended(id, 10, None, false).unwrap();

        assert_eq!(store.claim(1).unwrap()[0].id, id);
    }

    #[test]
    fn test_release_does_not_reopen_cancelled_row() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(NewAction::handler("Foo")).unwrap();
        store.claim(1).unwrap();
        assert!(store.cancel(id).unwrap());

        store
            .mark_ended(id, 10, Some("Action cancelled".to_string()), false)
            .unwrap();

        let action = store.get_by_id(id).unwrap().unwrap();
        assert!(action.is_done);
        assert_eq!(action.error.as_deref(), Some(TIMEOUT_CANCEL_ERROR));
        assert!(store.claim(1).unwrap().is_empty());
    }

    #[test]
    fn test_record_attempt() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(NewAction::handler("Foo")).unwrap();
        store.claim(1).unwrap();

        store.record_attempt(id, 2, Some("flaky".to_string())).unwrap();

        let action = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(action.attempt_count, 2);
        assert_eq!(action.error.as_deref(), Some("flaky"));
        assert!(action.is_in_flight());
    }

    #[test]
    fn test_cancel() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(NewAction::handler("Forever")).unwrap();
        store.claim(1).unwrap();

        assert!(store.cancel(id).unwrap());
        let action = store.get_by_id(id).unwrap().unwrap();
        assert!(action.is_done);
        assert!(!action.is_started);
        assert_eq!(action.error.as_deref(), Some(TIMEOUT_CANCEL_ERROR));
        assert!(action.duration_ms >= 0);

        // already terminal
        assert!(!store.cancel(id).unwrap());
        assert!(!store.cancel(ActionId(404)).unwrap());
    }

    #[test]
    fn test_clear_stale_started() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let stale = store.insert(NewAction::handler("Stale")).unwrap();
        let finished = store.insert(NewAction::handler("Finished")).unwrap();
        store.claim(2).unwrap();
        store.record_attempt(stale, 1, Some("connection lost".to_string())).unwrap();
        store.mark_ended(finished, 1, Some("kept".to_string()), true).unwrap();

        assert_eq!(store.clear_stale_started().unwrap(), 1);

        let action = store.get_by_id(stale).unwrap().unwrap();
        assert!(!action.is_started);
        assert_eq!(action.process_started_at, None);
        assert_eq!(action.error, None);
        assert_eq!(
            store.get_by_id(finished).unwrap().unwrap().error.as_deref(),
            Some("kept")
        );
        assert_eq!(store.claim(1).unwrap()[0].id, stale);
        assert!(store.get_by_id(finished).unwrap().unwrap().is_done);
    }

    #[test]
    fn test_purge_completed_older_than() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let old_done = store.insert(NewAction::handler("OldDone")).unwrap();
        let old_pending = store.insert(NewAction::handler("OldPending")).unwrap();
        let young_done = store.insert(NewAction::handler("YoungDone")).unwrap();

        let four_days_ago = now_millis() - 4 * MILLIS_PER_DAY;
        set_created_at(&store, old_done, four_days_ago);
        set_created_at(&store, old_pending, four_days_ago);
        set_created_at(&store, young_done, now_millis() - 2 * MILLIS_PER_DAY);
        store.mark_ended(old_done, 1, None, true).unwrap();
        store.mark_ended(young_done, 1, None, true).unwrap();

        assert_eq!(store.purge_completed_older_than(3).unwrap(), 1);

        assert!(store.get_by_id(old_done).unwrap().is_none());
        assert!(store.get_by_id(old_pending).unwrap().is_some());
        assert!(store.get_by_id(young_done).unwrap().is_some());
    }

    #[test]
    fn test_update_round_trip() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(NewAction::handler("Foo")).unwrap();

        let mut action = store.get_by_id(id).unwrap().unwrap();
        action.text = "Foo @a = 2".to_string();
        action.priority = 9;
        action.attempt_count = 3;
        action.is_done = true;
        action.error = Some("manual".to_string());
        store.update(&action).unwrap();

        let stored = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(stored.text, "Foo @a = 2");
        assert_eq!(stored.priority, 9);
        assert_eq!(stored.attempt_count, 3);
        assert!(stored.is_done);

        action.id = ActionId(12345);
        assert!(store.update(&action).is_err());
    }

    #[test]
    fn test_stats() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let ok = store.insert(NewAction::handler("Ok")).unwrap();
        let bad = store.insert(NewAction::handler("Bad")).unwrap();
        store.insert(NewAction::handler("Running")).unwrap();
        store.claim(3).unwrap();
        store.insert(NewAction::handler("Pending")).unwrap();
        store.mark_ended(ok, 1, None, true).unwrap();
        store.mark_ended(bad, 1, Some("nope".to_string()), true).unwrap();

        assert_eq!(
            store.stats().unwrap(),
            QueueStats {
                pending: 1,
                started: 1,
                done: 1,
                failed: 1,
                duplicates: 0,
            }
        );
    }
}
