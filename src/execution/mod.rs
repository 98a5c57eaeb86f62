//! The execution engine: claims actions, runs them with retries and
//! enforces their timeouts.
//!
//! [`Scheduler`] claims batches from the store and launches one
//! [`Executor`] task per action, tracking it in the [`ExecutionRegistry`].
//! [`Reaper`] cancels actions that outlive their timeout and purges old rows.

pub mod bookkeeping;
mod error;
mod executor;
mod reaper;
mod registry;
mod retry_policy;
mod scheduler;

pub use bookkeeping::{Bookkeeper, WritePolicy};
pub use error::ExecutionError;
pub use executor::Executor;
pub use reaper::{ReapReport, Reaper, ReaperSettings};
pub use registry::{ExecutionEntry, ExecutionRegistry};
pub use retry_policy::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerSettings};
