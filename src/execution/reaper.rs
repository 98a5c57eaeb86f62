//! Timeout enforcement and retention for the queue.

use super::bookkeeping::Bookkeeper;
use super::registry::ExecutionRegistry;
use crate::action::now_millis;
use crate::metrics;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReaperSettings {
    /// Minimum time between two cancellation passes.
    pub interval: Duration,
    /// Minimum time between two retention purges.
    pub purge_interval: Duration,
    pub retention_days: u32,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            purge_interval: Duration::from_secs(24 * 60 * 60),
            retention_days: 3,
        }
    }
}

/// Result of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub cancelled: usize,
    pub evicted: usize,
}

/// Cancels overdue actions, evicts finished registry entries and purges
/// old rows. Every pass is rate limited, so it is safe to call it from the
/// scheduler tick as well as from its own loop.
pub struct Reaper {
    bookkeeper: Bookkeeper,
    registry: Arc<ExecutionRegistry>,
    settings: ReaperSettings,
    last_pass: Mutex<Option<Instant>>,
    last_purge: Mutex<Option<Instant>>,
}

impl Reaper {
    pub fn new(
        bookkeeper: Bookkeeper,
        registry: Arc<ExecutionRegistry>,
        settings: ReaperSettings,
    ) -> Self {
        Self {
            bookkeeper,
            registry,
            settings,
            last_pass: Mutex::new(None),
            last_purge: Mutex::new(None),
        }
    }

    /// Cancel every overdue action and evict finished entries, now.
    pub async fn reap(&self) -> ReapReport {
        let overdue = self.registry.take_overdue(now_millis());
        let mut report = ReapReport::default();

        for (id, entry) in overdue {
            entry.cancel.cancel();
            warn!(
                "Cancelling action {} after timeout of {:?}: {}",
                id, entry.timeout, entry.snapshot.text
            );
            if let Some(true) = self
                .bookkeeper
                .write("cancel", move |store| store.cancel(id))
                .await
            {
                report.cancelled += 1;
            }
            metrics::record_timeout_cancel();
        }

        report.evicted = self.registry.evict_done();
        if report.cancelled > 0 || report.evicted > 0 {
            debug!(
                "Reaper cancelled {} and evicted {} actions",
                report.cancelled, report.evicted
            );
        }
        report
    }

    /// Run [`Reaper::reap`] unless a pass ran less than `interval` ago.
    pub async fn reap_if_due(&self) -> Option<ReapReport> {
        if !take_if_due(&self.last_pass, self.settings.interval) {
            return None;
        }
        Some(self.reap().await)
    }

    /// Delete finished rows older than the retention period, now.
    pub async fn purge(&self) -> Option<usize> {
        let days = self.settings.retention_days;
        let purged = self
            .bookkeeper
            .write("purge", move |store| store.purge_completed_older_than(days))
            .await?;
        if purged > 0 {
            info!("Purged {} finished actions older than {} days", purged, days);
        }
        Some(purged)
    }

    /// Run [`Reaper::purge`] unless a purge ran less than `purge_interval` ago.
    pub async fn purge_if_due(&self) -> Option<usize> {
        if !take_if_due(&self.last_purge, self.settings.purge_interval) {
            return None;
        }
        self.purge().await
    }

    /// Return rows left started by a previous process to pending.
    pub async fn clear_stale_started(&self) -> Option<usize> {
        self.bookkeeper
            .write("clear_stale_started", |store| store.clear_stale_started())
            .await
    }

    /// Reaper loop on its own cadence - call from a spawned task.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Reaper starting (interval={:?}, retention={} days)",
            self.settings.interval, self.settings.retention_days
        );
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_if_due().await;
                    self.purge_if_due().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Reaper shutting down");
                    break;
                }
            }
        }
    }
}

/// True (and the timestamp is reset) when `last` is unset or older than `every`.
fn take_if_due(last: &Mutex<Option<Instant>>, every: Duration) -> bool {
    let mut last = last.lock().unwrap();
    let due = last.map_or(true, |at| at.elapsed() >= every);
    if due {
        *last = Some(Instant::now());
    }
    due
}
