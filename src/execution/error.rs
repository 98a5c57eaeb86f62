use std::time::Duration;
use thiserror::Error;

/// Why an execution attempt failed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The command or handler failed; retried while attempts remain.
    #[error("{0:#}")]
    Transient(anyhow::Error),

    #[error("Unknown action type '{0}'")]
    UnknownActionKind(String),

    #[error("Function '{0}' is not registered")]
    UnregisteredHandler(String),

    #[error("Unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("Action timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Action cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Fatal errors end the action without further attempts.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExecutionError::Transient(_))
    }

    /// Label used in metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            ExecutionError::Transient(_) => "failed",
            ExecutionError::UnknownActionKind(_)
            | ExecutionError::UnregisteredHandler(_)
            | ExecutionError::UnknownConnection(_) => "fatal",
            ExecutionError::TimedOut(_) => "timed_out",
            ExecutionError::Cancelled => "cancelled",
        }
    }
}

impl From<anyhow::Error> for ExecutionError {
    fn from(err: anyhow::Error) -> Self {
        ExecutionError::Transient(err)
    }
}
