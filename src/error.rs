//! Error types for job construction and task execution.
//!
//! [`JobError`] covers misconfiguration caught while building or scheduling a
//! job. [`TaskError`] is what a task body signals back to its job; it never
//! escapes a [`ManagedJob`](crate::ManagedJob) run, which turns it into a
//! [`JobOutcome`](crate::JobOutcome).

use std::sync::Arc;

use thiserror::Error;

/// Result alias for builder and scheduling operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// The original error raised inside a task body.
pub type TaskCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum JobError {
    /// A builder or constructor received an argument it cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl JobError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }
}

/// Signal raised by a task body.
///
/// `Cancelled` is not a failure: it is the normal way for a task to stop after
/// observing the cancellation flag on its progress handle.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancelled,

    /// An error captured by one of the task adapters and wrapped one level.
    #[error("task invocation failed: {0}")]
    Invocation(TaskCause),

    /// An error raised directly by a progress-aware task.
    #[error("task failed: {0}")]
    Failed(TaskCause),
}

impl TaskError {
    /// Wraps any error as a direct task failure.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(err))
    }

    /// Unwraps one level of adapter wrapping and returns the original cause.
    ///
    /// Returns `None` for `Cancelled`, which carries no cause.
    pub fn into_cause(self) -> Option<TaskCause> {
        match self {
            TaskError::Cancelled => None,
            TaskError::Invocation(cause) | TaskError::Failed(cause) => Some(cause),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}
