//! Runs one claimed action through its attempts to a terminal state.
//!
//! ```text
//! Claimed -> Running(n) -> Succeeded
//!                       -> Retrying -> Running(n + 1)
//!                       -> Failed (fatal error, timeout or attempts exhausted)
//!                       -> Released (shutdown, back to pending)
//! ```

use super::bookkeeping::Bookkeeper;
use super::registry::ExecutionRegistry;
use super::retry_policy::RetryPolicy;
use super::ExecutionError;
use crate::action::{
    deadline_after, now_millis, Action, ActionId, ActionKind, ActionParameters, CommandSpec,
};
use crate::command_target::CommandTargets;
use crate::handlers::HandlerRegistry;
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a cancelled attempt gets to wind down before it is abandoned.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

pub struct Executor {
    bookkeeper: Bookkeeper,
    handlers: Arc<HandlerRegistry>,
    command_targets: Arc<CommandTargets>,
    registry: Arc<ExecutionRegistry>,
    retry_policy: RetryPolicy,
    default_timeout: Duration,
}

impl Executor {
    pub fn new(
        bookkeeper: Bookkeeper,
        handlers: Arc<HandlerRegistry>,
        command_targets: Arc<CommandTargets>,
        registry: Arc<ExecutionRegistry>,
        retry_policy: RetryPolicy,
        default_timeout: Duration,
    ) -> Self {
        Self {
            bookkeeper,
            handlers,
            command_targets,
            registry,
            retry_policy,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// Deadline for the whole execution of `action`, measured from its start.
    ///
    /// Commands honor an inline `@timeOut`, then `timeout_ms`, then 600s.
    /// Handlers use `timeout_ms`, then the configured default.
    pub fn execution_timeout(&self, action: &Action) -> Duration {
        match action.kind {
            ActionKind::Command => CommandSpec::parse(&action.text, action.timeout_ms).timeout,
            _ => action.effective_timeout(self.default_timeout),
        }
    }

    /// Execute an action already registered in the execution registry under
    /// `cancel`, and return its final state.
    ///
    /// The terminal store write always happens, whatever the outcome.
    pub async fn execute(&self, mut action: Action, cancel: CancellationToken) -> Action {
        let id = action.id;
        let started = Instant::now();
        let timeout = self.execution_timeout(&action);

        action.is_started = true;
        action.is_done = false;
        action.process_started_at = Some(now_millis());
        self.registry.update_snapshot(&action);
        self.bookkeeper
            .write("mark_started", move |store| store.mark_started(id))
            .await;
        let deadline_ms = deadline_after(action.process_started_at.unwrap_or_default(), timeout);

        debug!("Executing action {} ({}): {}", id, action.kind, action.text);

        let result = loop {
            action.attempt_count = action
                .attempt_count
                .saturating_add(1)
                .min(self.retry_policy.max_attempts.saturating_add(1));

            let attempt_started = Instant::now();
            let result = self.attempt(&action, &cancel, deadline_ms, timeout).await;
            metrics::record_attempt(
                action.kind.as_db_str(),
                if result.is_ok() { "ok" } else { "error" },
                attempt_started.elapsed(),
            );

            let err = match result {
                Ok(()) => {
                    action.error = None;
                    break Ok(());
                }
                Err(err) => err,
            };

            if matches!(
                err,
                ExecutionError::UnknownActionKind(_)
                    | ExecutionError::UnregisteredHandler(_)
                    | ExecutionError::UnknownConnection(_)
            ) {
                action.attempt_count = self.retry_policy.max_attempts;
            }
            action.error = Some(err.to_string());
            self.registry.update_snapshot(&action);

            let (attempt_count, error) = (action.attempt_count, action.error.clone());
            self.bookkeeper
                .write("record_attempt", move |store| {
                    store.record_attempt(id, attempt_count, error.clone())
                })
                .await;

            if !self.retry_policy.should_retry(&err, action.attempt_count) {
                break Err(err);
            }
            debug!(
                "Action {} attempt {}/{} failed, retrying in {:?}: {}",
                id, action.attempt_count, self.retry_policy.max_attempts,
                self.retry_policy.retry_delay, err
            );

            let remaining = remaining_until(deadline_ms);
            let stopped = tokio::select! {
                _ = tokio::time::sleep(self.retry_policy.retry_delay) => None,
                _ = tokio::time::sleep(remaining) => Some(ExecutionError::TimedOut(timeout)),
                _ = cancel.cancelled() => Some(self.stop_reason(id, deadline_ms, timeout)),
            };
            if let Some(err) = stopped {
                action.error = Some(err.to_string());
                break Err(err);
            }
        };

        action.is_started = false;
        action.duration_ms = started.elapsed().as_millis() as i64;
        let outcome = match &result {
            Ok(()) => {
                action.is_done = true;
                info!(
                    "Action {} succeeded after {} attempt(s) in {}ms",
                    id, action.attempt_count, action.duration_ms
                );
                "succeeded"
            }
            Err(ExecutionError::Cancelled) => {
                // shutdown: leave the row pending so the next run picks it up
                action.is_done = false;
                info!("Action {} released after cancellation", id);
                "released"
            }
            Err(err) => {
                action.is_done = true;
                error!(
                    "Action {} failed after {} attempt(s): {}",
                    id, action.attempt_count, err
                );
                err.outcome()
            }
        };

        let (duration_ms, error, is_done) =
            (action.duration_ms, action.error.clone(), action.is_done);
        self.bookkeeper
            .write("mark_ended", move |store| {
                store.mark_ended(id, duration_ms, error.clone(), is_done)
            })
            .await;

        self.registry.update_snapshot(&action);
        self.registry.remove(id);
        metrics::record_finished(outcome);
        action
    }

    async fn attempt(
        &self,
        action: &Action,
        cancel: &CancellationToken,
        deadline_ms: i64,
        timeout: Duration,
    ) -> Result<(), ExecutionError> {
        if cancel.is_cancelled() {
            return Err(self.stop_reason(action.id, deadline_ms, timeout));
        }
        if now_millis() >= deadline_ms {
            return Err(ExecutionError::TimedOut(timeout));
        }

        let attempt_cancel = cancel.child_token();
        match &action.kind {
            ActionKind::Handler => {
                let name = action.handler_name();
                let handler = self
                    .handlers
                    .get(name)
                    .ok_or_else(|| ExecutionError::UnregisteredHandler(name.to_string()))?;
                let params = ActionParameters::parse(&action.text);
                let work = handler.handle(params, attempt_cancel.clone());
                self.supervise(action.id, work, &attempt_cancel, cancel, deadline_ms, timeout)
                    .await
            }
            ActionKind::Command => {
                let spec = CommandSpec::parse(&action.text, action.timeout_ms);
                let target = self
                    .command_targets
                    .get(&spec.connection)
                    .ok_or_else(|| ExecutionError::UnknownConnection(spec.connection.clone()))?;
                let work = target.execute(&spec.command, attempt_cancel.clone());
                self.supervise(action.id, work, &attempt_cancel, cancel, deadline_ms, timeout)
                    .await
            }
            ActionKind::Unknown(kind) => Err(ExecutionError::UnknownActionKind(kind.clone())),
        }
    }

    /// Drive `work` until it finishes, the action is cancelled or the
    /// deadline passes. A stopped attempt gets [`CANCEL_GRACE`] to observe
    /// its token.
    async fn supervise<F>(
        &self,
        id: ActionId,
        work: F,
        attempt_cancel: &CancellationToken,
        cancel: &CancellationToken,
        deadline_ms: i64,
        timeout: Duration,
    ) -> Result<(), ExecutionError>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        tokio::pin!(work);
        let stopped = tokio::select! {
            biased;
            _ = cancel.cancelled() => self.stop_reason(id, deadline_ms, timeout),
            _ = tokio::time::sleep(remaining_until(deadline_ms)) => ExecutionError::TimedOut(timeout),
            result = &mut work => return result.map_err(ExecutionError::Transient),
        };

        attempt_cancel.cancel();
        if tokio::time::timeout(CANCEL_GRACE, &mut work).await.is_err() {
            warn!("Attempt of action {} ignored cancellation, abandoning it", id);
        }
        Err(stopped)
    }

    /// Why the token of action `id` fired. The reaper removes the entry
    /// before cancelling it, so a missing entry means a timeout even when
    /// the local deadline has not passed. Otherwise it was shutdown.
    fn stop_reason(&self, id: ActionId, deadline_ms: i64, timeout: Duration) -> ExecutionError {
        if now_millis() >= deadline_ms || !self.registry.contains(id) {
            ExecutionError::TimedOut(timeout)
        } else {
            ExecutionError::Cancelled
        }
    }
}

fn remaining_until(deadline_ms: i64) -> Duration {
    Duration::from_millis(deadline_ms.saturating_sub(now_millis()).max(0) as u64)
}
