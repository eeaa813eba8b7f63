//! Task shapes and the adapters that give them one uniform contract.
//!
//! A job runs exactly one [`Task`]. Plain closures and fallible closures are
//! wrapped by [`PlainTask`] and [`FallibleTask`], which drive the progress
//! handle and capture errors and panics. Anything that already implements
//! [`Task`] (for example a [`ProgressTask`]) is passed through untouched.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::error::TaskError;
use crate::progress::ProgressMonitor;

/// The unit of work a job executes.
pub trait Task: Send + Sync {
    fn run(&self, progress: &dyn ProgressMonitor) -> Result<(), TaskError>;
}

/// Marker error a fallible task returns to report that it stopped on request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// A panic captured while running a task body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task panicked: {message}")]
pub struct TaskPanic {
    pub message: String,
}

impl TaskPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self { message }
    }
}

/// Runs `body` inside the begin/done bracket and converts a panic into an error.
///
/// `done` is reported on every exit path, including panics and errors.
fn bracketed<F>(title: &str, progress: &dyn ProgressMonitor, body: F) -> Result<(), TaskError>
where
    F: FnOnce() -> Result<(), TaskError>,
{
    progress.begin_task(title, None);
    let result = panic::catch_unwind(AssertUnwindSafe(body));
    progress.done();
    match result {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Invocation(Arc::new(TaskPanic::from_payload(
            payload,
        )))),
    }
}

/// Adapts a closure that can neither fail nor observe progress.
pub struct PlainTask<F> {
    title: String,
    body: F,
}

impl<F> PlainTask<F>
where
    F: Fn() + Send + Sync,
{
    pub fn new(title: impl Into<String>, body: F) -> Self {
        Self {
            title: title.into(),
            body,
        }
    }
}

impl<F> Task for PlainTask<F>
where
    F: Fn() + Send + Sync,
{
    fn run(&self, progress: &dyn ProgressMonitor) -> Result<(), TaskError> {
        bracketed(&self.title, progress, || {
            (self.body)();
            Ok(())
        })
    }
}

impl<F> fmt::Debug for PlainTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainTask")
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

/// Adapts a closure that may fail with any error.
///
/// Errors are wrapped as [`TaskError::Invocation`], except a [`Cancelled`]
/// marker which becomes [`TaskError::Cancelled`]. A [`TaskError`] returned by
/// the closure is kept as is.
pub struct FallibleTask<F> {
    title: String,
    body: F,
}

impl<F, E> FallibleTask<F>
where
    F: Fn() -> Result<(), E> + Send + Sync,
    E: Into<BoxError>,
{
    pub fn new(title: impl Into<String>, body: F) -> Self {
        Self {
            title: title.into(),
            body,
        }
    }
}

impl<F, E> Task for FallibleTask<F>
where
    F: Fn() -> Result<(), E> + Send + Sync,
    E: Into<BoxError>,
{
    fn run(&self, progress: &dyn ProgressMonitor) -> Result<(), TaskError> {
        bracketed(&self.title, progress, || {
            (self.body)().map_err(classify_error)
        })
    }
}

impl<F> fmt::Debug for FallibleTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallibleTask")
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Maps a task's own error onto [`TaskError`]. Accepts `anyhow::Error` as well
/// as any concrete error type.
pub(crate) fn classify_error<E>(err: E) -> TaskError
where
    E: Into<BoxError>,
{
    let err: BoxError = err.into();
    if err.is::<Cancelled>() {
        return TaskError::Cancelled;
    }
    match err.downcast::<TaskError>() {
        Ok(task_error) => *task_error,
        Err(other) => TaskError::Invocation(Arc::from(other)),
    }
}

/// A progress-aware task built from a closure.
///
/// The closure owns its progress reporting and its cancellation checks.
pub struct ProgressTask<F> {
    body: F,
}

impl<F> ProgressTask<F>
where
    F: Fn(&dyn ProgressMonitor) -> Result<(), TaskError> + Send + Sync,
{
    pub fn new(body: F) -> Self {
        Self { body }
    }
}

impl<F> Task for ProgressTask<F>
where
    F: Fn(&dyn ProgressMonitor) -> Result<(), TaskError> + Send + Sync,
{
    fn run(&self, progress: &dyn ProgressMonitor) -> Result<(), TaskError> {
        (self.body)(progress)
    }
}

/// The shape a task was supplied in, kept by the builder until the title is final.
#[derive(Clone)]
pub(crate) enum TaskShape {
    Plain(Arc<dyn Fn() + Send + Sync>),
    Fallible(Arc<dyn Fn() -> Result<(), TaskError> + Send + Sync>),
    Progress(Arc<dyn Task>),
}

impl TaskShape {
    /// Wraps the shape into a uniform task labelled with `title`.
    pub(crate) fn adapt(&self, title: &str) -> Arc<dyn Task> {
        match self {
            TaskShape::Plain(body) => {
                let body = Arc::clone(body);
                Arc::new(PlainTask::new(title, move || body()))
            }
            TaskShape::Fallible(body) => {
                let body = Arc::clone(body);
                Arc::new(FallibleTask::new(title, move || body()))
            }
            TaskShape::Progress(task) => Arc::clone(task),
        }
    }
}

impl fmt::Debug for TaskShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            TaskShape::Plain(_) => "Plain",
            TaskShape::Fallible(_) => "Fallible",
            TaskShape::Progress(_) => "Progress",
        };
        f.write_str(shape)
    }
}
