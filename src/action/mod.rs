//! The queued unit of work and the formats of its text.

pub mod command;
mod models;
pub mod params;

pub use command::{CommandSpec, DEFAULT_COMMAND_TIMEOUT};
pub use models::{deadline_after, now_millis, Action, ActionId, ActionKind, NewAction};
pub use params::ActionParameters;
