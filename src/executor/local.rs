//! In-process execution service on top of tokio.
//!
//! Job bodies run on the blocking pool. Before a body starts, the arbiter
//! waits until no running job holds a conflicting rule and the same job is not
//! already running. Feedback dispatched to the UI context runs in submission
//! order on a single task.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DeferredAction, ErrorPrompt, JobExecutionService, JobHost};
use crate::error::{JobError, Result};
use crate::progress::{NullProgress, ProgressMonitor};
use crate::rule::{Key, SchedulingRule, SharedKey};
use crate::spec::Icon;
use crate::state_machine::ManagedJob;

type UiAction = Box<dyn FnOnce() + Send>;
type ProgressFactory = Arc<dyn Fn(&ManagedJob) -> Arc<dyn ProgressMonitor> + Send + Sync>;

/// A finished job kept visible with a follow-up action.
#[derive(Debug, Clone)]
pub struct KeptJob {
    pub job_id: Uuid,
    pub title: String,
    pub action: DeferredAction,
}

/// What the service currently shows for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presentation {
    pub icon: Option<Icon>,
    pub error_prompt: Option<ErrorPrompt>,
}

struct Tracked {
    job: Arc<ManagedJob>,
    progress: Arc<dyn ProgressMonitor>,
    handle: JoinHandle<()>,
}

/// Blocks job bodies until neither their rule nor their own job is busy.
///
/// A job resubmitted while it runs waits for the earlier run to finish.
#[derive(Default)]
struct Arbiter {
    running: Mutex<Vec<(Uuid, Option<Arc<dyn SchedulingRule>>)>>,
    released: Condvar,
}

struct RunPermit<'a> {
    arbiter: &'a Arbiter,
    job_id: Uuid,
}

impl Arbiter {
    fn acquire(&self, job: &ManagedJob) -> RunPermit<'_> {
        let rule = job.rule().cloned();
        let mut running = lock(&self.running);
        while running
            .iter()
            .any(|(id, held)| *id == job.id() || rules_conflict(held.as_deref(), rule.as_deref()))
        {
            debug!(job_id = %job.id(), "Waiting for conflicting job");
            running = self
                .released
                .wait(running)
                .unwrap_or_else(PoisonError::into_inner);
        }
        running.push((job.id(), rule));
        RunPermit {
            arbiter: self,
            job_id: job.id(),
        }
    }
}

fn rules_conflict(held: Option<&dyn SchedulingRule>, wanted: Option<&dyn SchedulingRule>) -> bool {
    match (held, wanted) {
        (Some(held), Some(wanted)) => held.is_conflicting(wanted) || wanted.is_conflicting(held),
        _ => false,
    }
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        lock(&self.arbiter.running).retain(|(id, _)| *id != self.job_id);
        self.arbiter.released.notify_all();
    }
}

struct Inner {
    runtime: Handle,
    arbiter: Arbiter,
    ui_tx: mpsc::UnboundedSender<UiAction>,
    tracked: Mutex<Vec<Tracked>>,
    kept: Mutex<Vec<KeptJob>>,
    dialogs: Mutex<Vec<SharedKey>>,
    presentation: Mutex<Vec<(Uuid, Presentation)>>,
    progress_factory: ProgressFactory,
}

/// Reference [`JobExecutionService`] for tests and the demo binary.
///
/// Must be created inside a tokio runtime. Priorities are logged but do not
/// reorder jobs.
#[derive(Clone)]
pub struct LocalExecutor {
    inner: Arc<Inner>,
}

impl LocalExecutor {
    pub fn new() -> Result<Self> {
        Self::with_progress_factory(|_| Arc::new(NullProgress::new()) as Arc<dyn ProgressMonitor>)
    }

    /// Uses `factory` to create the progress handle for every submitted job.
    pub fn with_progress_factory<F>(factory: F) -> Result<Self>
    where
        F: Fn(&ManagedJob) -> Arc<dyn ProgressMonitor> + Send + Sync + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| JobError::illegal_state(format!("no tokio runtime: {e}")))?;
        let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiAction>();
        runtime.spawn(async move {
            while let Some(action) = ui_rx.recv().await {
                if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                    warn!("UI action panicked");
                }
            }
        });
        Ok(Self {
            inner: Arc::new(Inner {
                runtime,
                arbiter: Arbiter::default(),
                ui_tx,
                tracked: Mutex::new(Vec::new()),
                kept: Mutex::new(Vec::new()),
                dialogs: Mutex::new(Vec::new()),
                presentation: Mutex::new(Vec::new()),
                progress_factory: Arc::new(factory),
            }),
        })
    }

    /// Marks jobs of `family` as shown in a modal view, or clears the mark.
    pub fn set_in_dialog<K: Key>(&self, family: K, in_dialog: bool) {
        let mut dialogs = lock(&self.inner.dialogs);
        dialogs.retain(|held| !held.key_eq(&family));
        if in_dialog {
            dialogs.push(Arc::new(family));
        }
    }

    /// Requests cancellation of every unfinished job in `family`.
    pub fn cancel_family(&self, family: &dyn Key) -> usize {
        let tracked = lock(&self.inner.tracked);
        let mut cancelled = 0;
        for entry in tracked
            .iter()
            .filter(|t| !t.handle.is_finished() && t.job.belongs_to(family))
        {
            entry.progress.set_cancelled(true);
            cancelled += 1;
        }
        info!(cancelled, "Cancelled job family");
        cancelled
    }

    /// Unfinished jobs that belong to `family`.
    pub fn find_family(&self, family: &dyn Key) -> Vec<Arc<ManagedJob>> {
        lock(&self.inner.tracked)
            .iter()
            .filter(|t| !t.handle.is_finished() && t.job.belongs_to(family))
            .map(|t| Arc::clone(&t.job))
            .collect()
    }

    /// Waits for every job in `family` submitted so far.
    ///
    /// Joined jobs drop out of [`presentation`](Self::presentation).
    pub async fn join_family(&self, family: &dyn Key) {
        let joined: Vec<Tracked> = {
            let mut tracked = lock(&self.inner.tracked);
            let (matching, rest) = tracked
                .drain(..)
                .partition::<Vec<_>, _>(|t| t.job.belongs_to(family));
            *tracked = rest;
            matching
        };
        self.await_joined(joined).await;
    }

    /// Waits until no submitted job is left, including ones submitted meanwhile.
    pub async fn join_all(&self) {
        loop {
            let joined: Vec<Tracked> = lock(&self.inner.tracked).drain(..).collect();
            if joined.is_empty() {
                break;
            }
            self.await_joined(joined).await;
        }
    }

    async fn await_joined(&self, joined: Vec<Tracked>) {
        let mut ids = Vec::with_capacity(joined.len());
        for entry in joined {
            ids.push(entry.job.id());
            let _ = entry.handle.await;
        }
        let still_tracked: Vec<Uuid> = lock(&self.inner.tracked)
            .iter()
            .map(|t| t.job.id())
            .collect();
        lock(&self.inner.presentation)
            .retain(|(id, _)| !ids.contains(id) || still_tracked.contains(id));
    }

    /// Waits until everything dispatched to the UI context so far has run.
    pub async fn flush_ui(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let marker: UiAction = Box::new(move || {
            let _ = done_tx.send(());
        });
        if self.inner.ui_tx.send(marker).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Finished jobs waiting for the user to open their feedback.
    pub fn kept(&self) -> Vec<KeptJob> {
        lock(&self.inner.kept).clone()
    }

    /// Runs the follow-up action of the kept job titled `title` on the UI
    /// context and removes it from the kept list. Returns whether one was found.
    pub fn trigger_kept(&self, title: &str) -> bool {
        let kept = {
            let mut kept = lock(&self.inner.kept);
            let position = kept.iter().position(|k| k.title == title);
            position.map(|i| kept.remove(i))
        };
        match kept {
            Some(kept) => {
                let action = kept.action;
                self.inner.dispatch(Box::new(move || {
                    action.trigger();
                }));
                true
            }
            None => false,
        }
    }

    /// Icon and error prompt of a job that was not joined yet.
    pub fn presentation(&self, job_id: Uuid) -> Presentation {
        lock(&self.inner.presentation)
            .iter()
            .find(|(id, _)| *id == job_id)
            .map(|(_, p)| p.clone())
            .unwrap_or_default()
    }

    fn spawn(&self, job: Arc<ManagedJob>, delay: Option<Duration>) {
        let progress = (self.inner.progress_factory)(&job);
        let inner = Arc::clone(&self.inner);
        let worker_job = Arc::clone(&job);
        let worker_progress = Arc::clone(&progress);
        let handle = self.inner.runtime.spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let title = worker_job.title().to_string();
            let result = tokio::task::spawn_blocking(move || {
                inner.execute(&worker_job, worker_progress.as_ref())
            })
            .await;
            if let Err(err) = result {
                warn!(title = %title, error = %err, "Job worker aborted");
            }
        });
        lock(&self.inner.tracked).push(Tracked {
            job,
            progress,
            handle,
        });
    }
}

impl Inner {
    fn execute(self: &Arc<Self>, job: &Arc<ManagedJob>, progress: &dyn ProgressMonitor) {
        let _permit = self.arbiter.acquire(job);
        // Runs of one job are serialized by the permit.
        let host = LocalHost {
            job: Arc::clone(job),
            inner: Arc::clone(self),
        };
        if let Err(err) = job.run(&host, progress) {
            warn!(job_id = %job.id(), error = %err, "Job run rejected");
        }
    }

    fn dispatch(&self, action: UiAction) {
        if self.ui_tx.send(action).is_err() {
            warn!("UI context is gone, dropping dispatched action");
        }
    }

    fn update_presentation(&self, job_id: Uuid, update: impl FnOnce(&mut Presentation)) {
        let mut presentation = lock(&self.presentation);
        match presentation.iter_mut().find(|(id, _)| *id == job_id) {
            Some((_, p)) => update(p),
            None => {
                let mut p = Presentation::default();
                update(&mut p);
                presentation.push((job_id, p));
            }
        }
    }
}

impl JobExecutionService for LocalExecutor {
    fn submit(&self, job: Arc<ManagedJob>) {
        debug!(job_id = %job.id(), priority = ?job.spec().priority(), "Submitting job");
        self.spawn(job, None);
    }

    fn submit_after(&self, job: Arc<ManagedJob>, delay: Duration) {
        debug!(job_id = %job.id(), delay_ms = delay.as_millis() as u64, "Submitting delayed job");
        self.spawn(job, Some(delay));
    }
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("tracked", &lock(&self.inner.tracked).len())
            .field("kept", &lock(&self.inner.kept).len())
            .finish()
    }
}

/// The host a [`LocalExecutor`] hands to one job run.
struct LocalHost {
    job: Arc<ManagedJob>,
    inner: Arc<Inner>,
}

impl JobHost for LocalHost {
    fn is_in_dialog(&self) -> bool {
        lock(&self.inner.dialogs)
            .iter()
            .any(|family| self.job.belongs_to(family.as_ref()))
    }

    fn set_icon(&self, icon: &Icon) {
        self.inner
            .update_presentation(self.job.id(), |p| p.icon = Some(icon.clone()));
    }

    fn set_error_prompt(&self, prompt: ErrorPrompt) {
        self.inner
            .update_presentation(self.job.id(), |p| p.error_prompt = Some(prompt));
    }

    fn dispatch_ui(&self, action: Box<dyn FnOnce() + Send>) {
        self.inner.dispatch(action);
    }

    fn keep_with_action(&self, action: DeferredAction) {
        debug!(job_id = %self.job.id(), "Keeping finished job with follow-up action");
        let mut kept = lock(&self.inner.kept);
        // A rerun replaces the feedback of the previous run.
        kept.retain(|k| k.job_id != self.job.id());
        kept.push(KeptJob {
            job_id: self.job.id(),
            title: self.job.title().to_string(),
            action,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
