//! The seam between jobs and the service that runs them.
//!
//! ```text
//!   JobBuilder ──build()──▶ ManagedJob ──submit──▶ JobExecutionService
//!                               ▲                        │
//!                               └──── run(host, progress)┘
//!                                       │
//!                 JobHost: dialog state, icon, error prompt,
//!                          UI dispatch, keep-visible action
//! ```
//!
//! The service owns workers, scheduling priorities, and conflict arbitration.
//! [`LocalExecutor`] is a small in-process implementation used by the demo
//! binary and the tests.

mod local;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::spec::Icon;
use crate::state_machine::ManagedJob;

pub use local::{KeptJob, LocalExecutor, Presentation};

/// Whether the service should raise its own error prompt for a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorPrompt {
    ShowImmediately,
    /// The job delivers feedback itself, so the service must stay quiet.
    Suppress,
}

/// Schedules jobs. Implementations decide threads, priorities, and ordering,
/// but must never run two jobs whose rules conflict at the same time.
pub trait JobExecutionService: Send + Sync {
    fn submit(&self, job: Arc<ManagedJob>);

    fn submit_after(&self, job: Arc<ManagedJob>, delay: Duration);
}

/// Presentation capabilities the service exposes to one job run.
pub trait JobHost: Send + Sync {
    /// True while the user watches the job in a blocking view.
    fn is_in_dialog(&self) -> bool;

    fn set_icon(&self, icon: &Icon);

    fn set_error_prompt(&self, prompt: ErrorPrompt);

    /// Runs `action` later on the UI-affinity context, never inline.
    fn dispatch_ui(&self, action: Box<dyn FnOnce() + Send>);

    /// Keeps the finished job visible with a follow-up action for the user.
    fn keep_with_action(&self, action: DeferredAction);
}

type DeferredFn = Box<dyn FnOnce() + Send>;

/// A follow-up action that fires at most once, however often it is triggered.
#[derive(Clone)]
pub struct DeferredAction {
    inner: Arc<Mutex<Option<DeferredFn>>>,
}

impl DeferredAction {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(action)))),
        }
    }

    /// Runs the action on the first call. Returns whether it ran.
    pub fn trigger(&self) -> bool {
        let action = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match action {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("pending", &self.is_pending())
            .finish()
    }
}
