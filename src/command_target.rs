//! Data sources that `command` actions run against.
//!
//! A command action names its target with a `[name]` prefix. The empty name
//! selects the default target, normally the queue's own database.

use crate::sqlite_persistence::BUSY_TIMEOUT;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Something a command text can be executed against.
#[async_trait]
pub trait CommandTarget: Send + Sync {
    /// Run `command`. When `cancel` fires the command is interrupted and an
    /// error is returned.
    async fn execute(&self, command: &str, cancel: CancellationToken) -> Result<()>;
}

/// A SQLite database file. Every call opens its own connection, which is
/// closed when the call ends, whichever way it ends.
pub struct SqliteCommandTarget {
    path: PathBuf,
}

impl SqliteCommandTarget {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CommandTarget for SqliteCommandTarget {
    async fn execute(&self, command: &str, cancel: CancellationToken) -> Result<()> {
        let path = self.path.clone();
        let command = command.to_string();
        let (handle_tx, handle_rx) = oneshot::channel();
        let task_cancel = cancel.clone();

        let mut work = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&path)
                .with_context(|| format!("Failed to open command target {:?}", path))?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            let _ = handle_tx.send(conn.get_interrupt_handle());
            if task_cancel.is_cancelled() {
                bail!("Command cancelled before it started");
            }
            conn.execute_batch(&command)?;
            Ok(())
        });

        tokio::select! {
            result = &mut work => result.context("Command task failed")?,
            _ = cancel.cancelled() => {
                if let Ok(handle) = handle_rx.await {
                    handle.interrupt();
                    debug!("Interrupted command on {:?}", self.path);
                }
                // The connection is dropped when the blocking call returns.
                bail!("Command interrupted")
            }
        }
    }
}

/// Command targets by name.
pub struct CommandTargets {
    targets: RwLock<HashMap<String, Arc<dyn CommandTarget>>>,
}

impl CommandTargets {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
        }
    }

    /// Targets from a name to SQLite file mapping, with `default` (if any)
    /// registered under the empty name.
    pub fn from_sqlite_paths(
        default: Option<&Path>,
        connections: &HashMap<String, PathBuf>,
    ) -> Self {
        let targets = Self::new();
        if let Some(path) = default {
            targets.register("", SqliteCommandTarget::new(path));
        }
        for (name, path) in connections {
            targets.register(name.clone(), SqliteCommandTarget::new(path));
        }
        targets
    }

    pub fn register<T>(&self, name: impl Into<String>, target: T)
    where
        T: CommandTarget + 'static,
    {
        let name = name.into();
        if self
            .targets
            .write()
            .unwrap()
            .insert(name.clone(), Arc::new(target))
            .is_some()
        {
            warn!("Command target '{}' registered twice, keeping the last one", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandTarget>> {
        self.targets.read().unwrap().get(name).cloned()
    }
}

impl Default for CommandTargets {
    fn default() -> Self {
        Self::new()
    }
}
