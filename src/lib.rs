//! Action Queue Library
//!
//! A durable, SQLite-backed queue of actions executed by a local pool of
//! workers with priorities, deduplication, retries and timeouts.

pub mod action;
pub mod command_target;
pub mod config;
pub mod execution;
pub mod handlers;
pub mod metrics;
pub mod queue_store;
pub mod service;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use action::{Action, ActionId, ActionKind, ActionParameters, NewAction};
pub use command_target::{CommandTarget, CommandTargets, SqliteCommandTarget};
pub use config::{AppConfig, QueueSettings};
pub use handlers::{ActionHandler, HandlerRegistry};
pub use queue_store::{QueueStats, QueueStore, SqliteQueueStore};
pub use service::ActionQueue;
