//! The immutable job configuration produced by [`JobBuilder`](crate::JobBuilder).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ForegroundPolicy;
use crate::rule::{Key, SchedulingRule, SharedKey};
use crate::state_machine::JobOutcome;
use crate::task::Task;

/// Title used when the caller never sets one.
pub const DEFAULT_TITLE: &str = "Operation in progress...";

/// Completion title derived for jobs that kept [`DEFAULT_TITLE`].
pub const DEFAULT_COMPLETION_TITLE: &str = "Finished operation";

/// How the execution service presents a job.
///
/// `User` jobs may be shown in a blocking progress view; `System` jobs are
/// hidden unless the service runs in a verbose mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    #[default]
    Default,
    User,
    System,
}

/// Scheduling priority, ordered from most to least urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
    Lowest,
}

impl Priority {
    /// The execution service's priority level. Lower numbers run first.
    pub fn level(self) -> u8 {
        match self {
            Priority::High => 20,
            Priority::Normal => 30,
            Priority::Low => 40,
            Priority::Lowest => 50,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
            Priority::Lowest => write!(f, "lowest"),
        }
    }
}

/// Opaque image handle the service uses to decorate a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Icon(String);

impl Icon {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Callback receiving a finished job's outcome.
///
/// The flag is `true` when the feedback is delivered right after completion
/// and `false` when the user asked for it later.
pub type FeedbackCallback = Arc<dyn Fn(&JobOutcome, bool) + Send + Sync>;

/// How and when the caller wants to hear about a finished job.
#[derive(Clone)]
pub struct FeedbackSpec {
    pub callback: FeedbackCallback,
    pub deliver_immediately: bool,
}

impl fmt::Debug for FeedbackSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackSpec")
            .field("deliver_immediately", &self.deliver_immediately)
            .finish_non_exhaustive()
    }
}

/// Lifecycle notification passed to a [`JobChangeListener`].
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub title: String,
    pub outcome: Option<JobOutcome>,
}

/// Observer of a job's lifecycle. All methods default to no-ops.
pub trait JobChangeListener: Send + Sync {
    fn scheduled(&self, _event: &JobEvent) {}

    fn running(&self, _event: &JobEvent) {}

    fn done(&self, _event: &JobEvent) {}
}

/// Frozen job configuration.
#[derive(Clone)]
pub struct JobSpec {
    pub(crate) title: String,
    pub(crate) family: SharedKey,
    pub(crate) task: Arc<dyn Task>,
    pub(crate) kind: JobKind,
    pub(crate) priority: Option<Priority>,
    pub(crate) icon: Option<Icon>,
    pub(crate) completion_title: String,
    pub(crate) feedback: Option<FeedbackSpec>,
    pub(crate) listener: Option<Arc<dyn JobChangeListener>>,
    pub(crate) rule: Option<Arc<dyn SchedulingRule>>,
    pub(crate) foreground_policy: ForegroundPolicy,
}

impl JobSpec {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn family(&self) -> &dyn Key {
        self.family.as_ref()
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// `None` leaves the execution service's default in place.
    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn icon(&self) -> Option<&Icon> {
        self.icon.as_ref()
    }

    pub fn completion_title(&self) -> &str {
        &self.completion_title
    }

    pub fn feedback(&self) -> Option<&FeedbackSpec> {
        self.feedback.as_ref()
    }

    pub fn listener(&self) -> Option<&Arc<dyn JobChangeListener>> {
        self.listener.as_ref()
    }

    pub fn rule(&self) -> Option<&Arc<dyn SchedulingRule>> {
        self.rule.as_ref()
    }

    pub fn foreground_policy(&self) -> ForegroundPolicy {
        self.foreground_policy
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("title", &self.title)
            .field("family", &self.family)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("icon", &self.icon)
            .field("completion_title", &self.completion_title)
            .field("feedback", &self.feedback)
            .field("rule", &self.rule)
            .field("foreground_policy", &self.foreground_policy)
            .finish_non_exhaustive()
    }
}

/// Derives the completion title used when the caller left it blank.
pub(crate) fn derive_completion_title(title: &str, completion_title: Option<&str>) -> String {
    match completion_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(explicit) => explicit.to_string(),
        None if title == DEFAULT_TITLE => DEFAULT_COMPLETION_TITLE.to_string(),
        None => format!("Finished '{title}'."),
    }
}
