//! Retry policy for failed attempts.

use super::ExecutionError;
use crate::config::QueueSettings;
use std::time::Duration;

/// Decides whether a failed attempt gets another try.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts made before the action fails permanently.
    pub max_attempts: u8,
    /// Pause between a failed attempt and the next one.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(settings: &QueueSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            retry_delay: settings.retry_delay,
        }
    }

    /// True if `error` is retryable and fewer than `max_attempts` attempts
    /// were made so far.
    pub fn should_retry(&self, error: &ExecutionError, attempt_count: u8) -> bool {
        !error.is_fatal() && attempt_count < self.max_attempts
    }

    pub fn has_attempts_left(&self, attempt_count: u8) -> bool {
        attempt_count < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(123),
        }
    }
}
