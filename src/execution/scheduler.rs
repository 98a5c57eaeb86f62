//! The polling loop that claims actions and launches their executors.

use super::bookkeeping;
use super::executor::Executor;
use super::reaper::Reaper;
use crate::action::{Action, ActionId};
use crate::metrics;
use crate::queue_store::QueueStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Claim batch size.
    pub threads: usize,
    pub poll_interval: Duration,
    pub clear_started_on_startup: bool,
    /// How long shutdown waits for cancelled executors.
    pub shutdown_grace: Duration,
}

pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    executor: Arc<Executor>,
    reaper: Arc<Reaper>,
    settings: SchedulerSettings,
    running_handles: Mutex<HashMap<ActionId, JoinHandle<()>>>,
    /// Parent of every executor's cancellation token.
    executions: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        executor: Arc<Executor>,
        reaper: Arc<Reaper>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            executor,
            reaper,
            settings,
            running_handles: Mutex::new(HashMap::new()),
            executions: CancellationToken::new(),
        }
    }

    pub fn reaper(&self) -> &Arc<Reaper> {
        &self.reaper
    }

    /// Number of executors still running.
    pub fn running(&self) -> usize {
        let mut handles = self.running_handles.lock().unwrap();
        handles.retain(|_, handle| !handle.is_finished());
        handles.len()
    }

    fn take_handles(&self) -> Vec<(ActionId, JoinHandle<()>)> {
        self.running_handles.lock().unwrap().drain().collect()
    }

    /// Claim a batch and launch an executor for each claimed action, then run
    /// the reaper if its cadence elapsed. Returns how many were launched.
    ///
    /// Store failures are logged; the tick itself never fails.
    pub async fn tick(&self) -> usize {
        if self.executions.is_cancelled() {
            return 0;
        }

        let threads = self.settings.threads;
        let launched = match bookkeeping::blocking(&self.store, move |store| store.claim(threads))
            .await
        {
            Ok(actions) => {
                metrics::record_claimed(actions.len());
                let mut launched = 0;
                for action in actions {
                    if self.launch(action) {
                        launched += 1;
                    }
                }
                launched
            }
            Err(e) => {
                error!("Failed to claim actions: {:#}", e);
                0
            }
        };
        if launched > 0 {
            debug!("Launched {} actions", launched);
        }

        self.reaper.reap_if_due().await;
        self.reaper.purge_if_due().await;
        launched
    }

    /// Register `action` and spawn its executor. Returns false if the action
    /// is already in flight in this process.
    pub fn launch(&self, action: Action) -> bool {
        let timeout = self.executor.execution_timeout(&action);
        // registered before the task exists, so a cleanup pass cannot miss it
        let Some(cancel) = self
            .executor
            .registry()
            .register(&action, timeout, &self.executions)
        else {
            warn!("Action {} is already running, not launching it again", action.id);
            return false;
        };

        let id = action.id;
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move {
            executor.execute(action, cancel).await;
        });

        let mut handles = self.running_handles.lock().unwrap();
        handles.retain(|_, handle| !handle.is_finished());
        handles.insert(id, handle);
        true
    }

    /// Execute `action` on the calling task and return its final state.
    ///
    /// Returns `None` if the action is already in flight.
    pub async fn run_now(&self, action: Action) -> Option<Action> {
        let timeout = self.executor.execution_timeout(&action);
        let cancel = self
            .executor
            .registry()
            .register(&action, timeout, &self.executions)?;
        Some(self.executor.execute(action, cancel).await)
    }

    /// Polling loop - call from a spawned task. Returns after shutdown
    /// completed.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Starting action scheduler (threads={}, poll_interval={:?})",
            self.settings.threads, self.settings.poll_interval
        );

        if self.settings.clear_started_on_startup {
            if let Some(count) = self.reaper.clear_stale_started().await {
                if count > 0 {
                    info!("Recovered {} actions left started by a previous run", count);
                }
            }
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await;
        info!("Action scheduler stopped");
    }

    /// Stop claiming, cancel in-flight executors and wait for them up to the
    /// shutdown grace period.
    pub async fn shutdown(&self) {
        self.executions.cancel();
        let handles = self.take_handles();
        info!("Shutting down scheduler, {} executors running", handles.len());

        let deadline = tokio::time::Instant::now() + self.settings.shutdown_grace;
        for (id, handle) in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Executor of action {} panicked: {}", id, e),
                Err(_) => warn!(
                    "Executor of action {} still running after {:?}",
                    id, self.settings.shutdown_grace
                ),
            }
        }
    }
}
