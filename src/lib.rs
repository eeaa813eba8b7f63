//! Fluent construction of background jobs with conflict rules, cancellation,
//! and user feedback.
//!
//! A [`JobBuilder`] produces an immutable [`JobSpec`] wrapped in a
//! [`ManagedJob`], which an [`executor::JobExecutionService`] runs. Each run
//! ends in a [`JobOutcome`] that the job hands to its feedback callback either
//! right away or when the user asks for it.

pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod progress;
pub mod rule;
pub mod spec;
pub mod state_machine;
pub mod task;
pub mod ui;

pub use builder::{JobBuilder, TimeUnit};
pub use config::{ForegroundPolicy, JobsConfig};
pub use error::{JobError, Result, TaskCause, TaskError};
pub use executor::{DeferredAction, ErrorPrompt, JobExecutionService, JobHost, LocalExecutor};
pub use progress::{NullProgress, ProgressMonitor};
pub use rule::{ConflictRule, Key, SchedulingRule};
pub use spec::{FeedbackSpec, Icon, JobChangeListener, JobEvent, JobKind, JobSpec, Priority};
pub use state_machine::{JobOutcome, JobState, ManagedJob, RunRecord, Severity};
pub use task::{Cancelled, Task};
