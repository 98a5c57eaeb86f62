//! Application handlers for `handler` actions.
//!
//! Handlers are looked up by the first whitespace-delimited token of the
//! action text, case-sensitively, and receive the parsed parameters plus a
//! cancellation token that fires when the action times out or the
//! scheduler shuts down.

use crate::action::ActionParameters;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A callback run for `handler` actions.
///
/// Implementations should watch `cancel` at I/O and loop boundaries and
/// return early once it fires.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, params: ActionParameters, cancel: CancellationToken) -> Result<()>;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(ActionParameters, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, params: ActionParameters, cancel: CancellationToken) -> Result<()> {
        (self)(params, cancel).await
    }
}

/// Name to handler mapping, shared between the host and the executors.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous registration.
    pub fn register<H>(&self, name: impl Into<String>, handler: H)
    where
        H: ActionHandler + 'static,
    {
        let name = name.into();
        let replaced = self
            .handlers
            .write()
            .unwrap()
            .insert(name.clone(), Arc::new(handler))
            .is_some();
        if replaced {
            info!("Replaced action handler {}", name);
        } else {
            info!("Registered action handler {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.read().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Handlers bundled with the binary for smoke testing a deployment.
pub mod builtin {
    use super::*;

    /// `Echo @any = value` logs its parameters.
    pub async fn echo(params: ActionParameters, _cancel: CancellationToken) -> Result<()> {
        let mut pairs: Vec<_> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        pairs.sort();
        info!("Echo: {}", pairs.join(", "));
        Ok(())
    }

    /// `Sleep @ms = 250` waits, stopping early when cancelled.
    pub async fn sleep(params: ActionParameters, cancel: CancellationToken) -> Result<()> {
        let ms = params
            .get("ms")
            .unwrap_or("1000")
            .parse::<u64>()
            .context("Invalid @ms parameter")?;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
            _ = cancel.cancelled() => anyhow::bail!("Sleep cancelled after less than {}ms", ms),
        }
    }

    pub fn register_all(registry: &HandlerRegistry) {
        registry.register("Echo", echo);
        registry.register("Sleep", sleep);
    }
}
