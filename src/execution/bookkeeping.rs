//! Store writes made on behalf of running actions.
//!
//! A failing write is retried a few times with a short pause, all under an
//! overall timeout. When it still fails it is logged and dropped: bookkeeping
//! never aborts the work it records.

use crate::metrics;
use crate::queue_store::QueueStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct WritePolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub overall_timeout: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(200),
            overall_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs a store call on the blocking pool.
pub async fn blocking<T, F>(store: &Arc<dyn QueueStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn QueueStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .context("Store task failed")?
}

#[derive(Clone)]
pub struct Bookkeeper {
    store: Arc<dyn QueueStore>,
    policy: WritePolicy,
}

impl Bookkeeper {
    pub fn new(store: Arc<dyn QueueStore>, policy: WritePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Run `write` with retries. Returns `None` when every try failed or the
    /// overall timeout elapsed.
    pub async fn write<T, F>(&self, operation: &'static str, write: F) -> Option<T>
    where
        T: Send + 'static,
        F: Fn(&dyn QueueStore) -> Result<T> + Clone + Send + Sync + 'static,
    {
        let attempts = self.policy.attempts.max(1);
        let tries = async {
            let mut last_error = None;
            for attempt in 1..=attempts {
                match blocking(&self.store, write.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        warn!(
                            "Store write '{}' failed (try {}/{}): {:#}",
                            operation, attempt, attempts, e
                        );
                        last_error = Some(e);
                    }
                }
                if attempt < attempts {
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
            Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no tries made")))
        };

        match tokio::time::timeout(self.policy.overall_timeout, tries).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                error!("Dropping store write '{}': {:#}", operation, e);
                metrics::record_bookkeeping_failure(operation);
                None
            }
            Err(_) => {
                error!(
                    "Dropping store write '{}': timed out after {:?}",
                    operation, self.policy.overall_timeout
                );
                metrics::record_bookkeeping_failure(operation);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionId;
    use crate::queue_store::MockQueueStore;
    use mockall::Sequence;

    fn fast_policy() -> WritePolicy {
        WritePolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
            overall_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut store = MockQueueStore::new();
        let mut seq = Sequence::new();
        store
            .expect_mark_started()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(anyhow::anyhow!("database is locked")));
        store
            .expect_mark_started()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let bookkeeper = Bookkeeper::new(Arc::new(store), fast_policy());
        let result = bookkeeper
            .write("mark_started", |s| s.mark_started(ActionId(1)))
            .await;

        assert!(result.is_some());
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let mut store = MockQueueStore::new();
        store
            .expect_cancel()
            .times(3)
            .returning(|_| Err(anyhow::anyhow!("disk I/O error")));

        let bookkeeper = Bookkeeper::new(Arc::new(store), fast_policy());
        let result = bookkeeper.write("cancel", |s| s.cancel(ActionId(7))).await;

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_overall_timeout() {
        let mut store = MockQueueStore::new();
        store
            .expect_mark_started()
            .returning(|_| Err(anyhow::anyhow!("database is locked")));

        let bookkeeper = Bookkeeper::new(
            Arc::new(store),
            WritePolicy {
                attempts: 1000,
                delay: Duration::from_millis(20),
                overall_timeout: Duration::from_millis(100),
            },
        );
        let result = bookkeeper
            .write("mark_started", |s| s.mark_started(ActionId(1)))
            .await;

        assert!(result.is_none());
    }
}
