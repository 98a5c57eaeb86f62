//! Common test infrastructure
//!
//! Each test gets an isolated queue database in a temp directory and, when
//! it needs one, a running scheduler that is shut down on drop.

#![allow(dead_code)]

use action_queue::{Action, ActionId, ActionQueue, QueueSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long helpers wait for the queue to reach a state.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings with short intervals so tests finish quickly.
pub fn fast_settings(store_path: PathBuf) -> QueueSettings {
    QueueSettings {
        store_path,
        threads: 2,
        retry_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(20),
        reaper_interval: Duration::from_millis(50),
        shutdown_grace: Duration::from_secs(5),
        ..Default::default()
    }
}

/// A queue backed by a temp SQLite file.
pub struct TestQueue {
    pub queue: Arc<ActionQueue>,
    shutdown: CancellationToken,
    run_handle: Option<JoinHandle<()>>,
    // Keep the database alive until drop
    temp_dir: TempDir,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Opens a queue after letting the caller adjust the fast settings.
    pub fn with_settings(configure: impl FnOnce(&mut QueueSettings)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut settings = fast_settings(temp_dir.path().join("queue.db"));
        configure(&mut settings);
        let queue = ActionQueue::open(settings).expect("Failed to open queue");

        Self {
            queue: Arc::new(queue),
            shutdown: CancellationToken::new(),
            run_handle: None,
            temp_dir,
        }
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn store_path(&self) -> PathBuf {
        self.queue.settings().store_path.clone()
    }

    /// Start the scheduler and reaper loops in the background.
    pub fn start(&mut self) {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        self.run_handle = Some(tokio::spawn(async move { queue.run(shutdown).await }));
    }

    /// Signal shutdown and wait for the run loop to return.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.run_handle.take() {
            tokio::time::timeout(WAIT_TIMEOUT, handle)
                .await
                .expect("Queue did not shut down in time")
                .expect("Run loop panicked");
        }
    }

    /// Poll the store until `predicate` holds for action `id`.
    pub async fn wait_for(&self, id: ActionId, predicate: impl Fn(&Action) -> bool) -> Action {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            if let Some(action) = self.queue.get_action(id).await.expect("Failed to read action") {
                if predicate(&action) {
                    return action;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("Action {} did not reach the expected state in time", id);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until action `id` is done.
    pub async fn wait_done(&self, id: ActionId) -> Action {
        self.wait_for(id, |action| action.is_done).await
    }
}

impl Drop for TestQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
