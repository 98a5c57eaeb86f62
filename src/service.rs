//! The host-facing API of the queue.

use crate::action::{Action, ActionId, NewAction};
use crate::command_target::CommandTargets;
use crate::config::QueueSettings;
use crate::execution::bookkeeping::blocking;
use crate::execution::{
    Bookkeeper, ExecutionRegistry, Executor, Reaper, ReaperSettings, RetryPolicy, Scheduler,
    SchedulerSettings, WritePolicy,
};
use crate::handlers::{ActionHandler, HandlerRegistry};
use crate::queue_store::{QueueStats, QueueStore, SqliteQueueStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A durable action queue with its execution engine.
///
/// Producers add actions; [`ActionQueue::run`] executes them until shutdown.
pub struct ActionQueue {
    settings: QueueSettings,
    store: Arc<dyn QueueStore>,
    handlers: Arc<HandlerRegistry>,
    command_targets: Arc<CommandTargets>,
    scheduler: Arc<Scheduler>,
}

impl ActionQueue {
    /// Open the SQLite queue at `settings.store_path`.
    ///
    /// Command actions without a connection prefix run against the same
    /// database unless `settings.connections` maps `""` elsewhere.
    pub fn open(settings: QueueSettings) -> Result<Self> {
        settings.validate()?;
        let store = SqliteQueueStore::new(&settings.store_path)
            .with_context(|| format!("Failed to open queue store {:?}", settings.store_path))?
            .with_activity_window(settings.activity_window);

        let default_target = if settings.connections.contains_key("") {
            None
        } else {
            Some(settings.store_path.as_path())
        };
        let command_targets =
            CommandTargets::from_sqlite_paths(default_target, &settings.connections);

        Self::with_store(settings, Arc::new(store), command_targets)
    }

    /// Build a queue around any store implementation.
    pub fn with_store(
        settings: QueueSettings,
        store: Arc<dyn QueueStore>,
        command_targets: CommandTargets,
    ) -> Result<Self> {
        settings.validate()?;
        let handlers = Arc::new(HandlerRegistry::new());
        let command_targets = Arc::new(command_targets);
        let registry = Arc::new(ExecutionRegistry::new());
        let bookkeeper = Bookkeeper::new(store.clone(), WritePolicy::default());

        let executor = Arc::new(Executor::new(
            bookkeeper.clone(),
            handlers.clone(),
            command_targets.clone(),
            registry.clone(),
            RetryPolicy::new(&settings),
            settings.default_execution_timeout,
        ));
        let reaper = Arc::new(Reaper::new(
            bookkeeper,
            registry,
            ReaperSettings {
                interval: settings.reaper_interval,
                purge_interval: settings.purge_interval,
                retention_days: settings.retention_days,
            },
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            executor,
            reaper,
            SchedulerSettings {
                threads: settings.threads,
                poll_interval: settings.poll_interval,
                clear_started_on_startup: settings.clear_started_on_startup,
                shutdown_grace: settings.shutdown_grace,
            },
        ));

        Ok(Self {
            settings,
            store,
            handlers,
            command_targets,
            scheduler,
        })
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn command_targets(&self) -> &Arc<CommandTargets> {
        &self.command_targets
    }

    // === Producers ===

    pub async fn add_action(&self, action: NewAction) -> Result<ActionId> {
        blocking(&self.store, move |store| store.insert(action)).await
    }

    /// Add several actions at once. A single action goes through
    /// [`ActionQueue::add_action`]; an empty batch does nothing.
    pub async fn add_actions(&self, mut actions: Vec<NewAction>) -> Result<Vec<ActionId>> {
        match actions.len() {
            0 => Ok(Vec::new()),
            1 => {
                let action = actions.remove(0);
                Ok(vec![self.add_action(action).await?])
            }
            _ => blocking(&self.store, move |store| store.insert_batch(&actions)).await,
        }
    }

    pub async fn get_action(&self, id: ActionId) -> Result<Option<Action>> {
        blocking(&self.store, move |store| store.get_by_id(id)).await
    }

    pub async fn update_action(&self, action: Action) -> Result<()> {
        blocking(&self.store, move |store| store.update(&action)).await
    }

    /// Register a handler for `handler` actions whose first token is `name`.
    pub fn add_function<H>(&self, name: impl Into<String>, handler: H)
    where
        H: ActionHandler + 'static,
    {
        self.handlers.register(name, handler);
    }

    // === Execution ===

    /// Claim a batch of up to `threads` actions without executing them. The
    /// caller owns their execution, e.g. through [`ActionQueue::start_action`].
    pub async fn get_new_actions(&self) -> Result<Vec<Action>> {
        let threads = self.settings.threads;
        blocking(&self.store, move |store| store.claim(threads)).await
    }

    /// Execute one action to its terminal state on the calling task.
    ///
    /// Returns `None` if the action is already running in this process.
    pub async fn start_action(&self, action: Action) -> Option<Action> {
        self.scheduler.run_now(action).await
    }

    /// One scheduler tick: claim and launch a batch. Returns how many
    /// actions were launched.
    pub async fn process_queue(&self) -> usize {
        self.scheduler.tick().await
    }

    /// Purge old finished actions, at most once per purge interval.
    pub async fn clear_old(&self) -> Option<usize> {
        self.scheduler.reaper().purge_if_due().await
    }

    /// Return started but unfinished actions to pending.
    pub async fn clear_started(&self) -> Option<usize> {
        self.scheduler.reaper().clear_stale_started().await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        blocking(&self.store, |store| store.stats()).await
    }

    /// Number of actions currently executing in this process.
    pub fn running(&self) -> usize {
        self.scheduler.running()
    }

    /// Run the scheduler and the reaper until `shutdown` fires, then wait
    /// for in-flight actions up to the shutdown grace period.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Action queue running on {:?} with handlers [{}]",
            self.settings.store_path,
            self.handlers.names().join(", ")
        );

        let reaper = self.scheduler.reaper().clone();
        let reaper_shutdown = shutdown.clone();
        let reaper_task = tokio::spawn(async move { reaper.run(reaper_shutdown).await });

        self.scheduler.run(shutdown).await;
        let _ = reaper_task.await;
    }
}
