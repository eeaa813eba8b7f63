use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TaskCause;

/// The states of one job run.
///
/// Each run flows through: IDLE → RUNNING → terminal → FEEDBACK_RESOLVED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    Cancelled,
    Failed,
    FeedbackResolved,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Cancelled | JobState::Failed
        )
    }

    /// Whether `next` may follow `self` within a run.
    ///
    /// `FeedbackResolved → Running` is a rerun of a rescheduled job.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Idle | JobState::FeedbackResolved, JobState::Running) => true,
            (JobState::Running, next) => next.is_terminal(),
            (terminal, JobState::FeedbackResolved) => terminal.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "IDLE"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Succeeded => write!(f, "SUCCEEDED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::FeedbackResolved => write!(f, "FEEDBACK_RESOLVED"),
        }
    }
}

/// How serious an outcome is for the user. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ok,
    Cancel,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ok => write!(f, "ok"),
            Severity::Cancel => write!(f, "cancel"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// The result of one job run.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success { message: String },
    Cancelled { message: String },
    Failed { message: String, cause: TaskCause },
}

impl JobOutcome {
    pub fn severity(&self) -> Severity {
        match self {
            JobOutcome::Success { .. } => Severity::Ok,
            JobOutcome::Cancelled { .. } => Severity::Cancel,
            JobOutcome::Failed { .. } => Severity::Error,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JobOutcome::Success { message }
            | JobOutcome::Cancelled { message }
            | JobOutcome::Failed { message, .. } => message,
        }
    }

    /// The task's own error, for failed runs.
    pub fn cause(&self) -> Option<&TaskCause> {
        match self {
            JobOutcome::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }

    /// The terminal state this outcome puts a run in.
    pub fn terminal_state(&self) -> JobState {
        match self {
            JobOutcome::Success { .. } => JobState::Succeeded,
            JobOutcome::Cancelled { .. } => JobState::Cancelled,
            JobOutcome::Failed { .. } => JobState::Failed,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Failed { message, cause } => write!(f, "{message} ({cause})"),
            other => f.write_str(other.message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn run_transitions() {
        assert!(JobState::Idle.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(JobState::Cancelled.can_transition_to(JobState::FeedbackResolved));
        assert!(JobState::FeedbackResolved.can_transition_to(JobState::Running));

        assert!(!JobState::Idle.can_transition_to(JobState::Succeeded));
        assert!(!JobState::Running.can_transition_to(JobState::Running));
        assert!(!JobState::Running.can_transition_to(JobState::FeedbackResolved));
        assert!(!JobState::Succeeded.can_transition_to(JobState::Running));
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Ok < Severity::Cancel);
        assert!(Severity::Cancel < Severity::Error);
    }

    #[test]
    fn outcome_accessors() {
        let ok = JobOutcome::Success {
            message: "Finished 'Backup'.".into(),
        };
        assert_eq!(ok.severity(), Severity::Ok);
        assert_eq!(ok.message(), "Finished 'Backup'.");
        assert!(ok.cause().is_none());
        assert_eq!(ok.terminal_state(), JobState::Succeeded);

        let err = JobOutcome::Failed {
            message: "Job 'Backup' finished with error(s).".into(),
            cause: Arc::new(std::io::Error::other("disk full")),
        };
        assert_eq!(err.severity(), Severity::Error);
        assert_eq!(
            err.to_string(),
            "Job 'Backup' finished with error(s). (disk full)"
        );
        assert_eq!(err.terminal_state(), JobState::Failed);
    }

    #[test]
    fn state_display() {
        assert_eq!(JobState::Idle.to_string(), "IDLE");
        assert_eq!(JobState::FeedbackResolved.to_string(), "FEEDBACK_RESOLVED");
    }
}
