use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::feedback::{self, Delivery};
use super::state::{JobOutcome, JobState, Severity};
use crate::error::{JobError, Result, TaskError};
use crate::executor::{JobExecutionService, JobHost};
use crate::progress::ProgressMonitor;
use crate::rule::{Key, SchedulingRule};
use crate::spec::{JobEvent, JobSpec};
use crate::task::TaskPanic;

/// Structured record produced at the end of every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub job_id: String,
    pub title: String,
    pub severity: Severity,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[derive(Debug)]
struct RunState {
    state: JobState,
    last_outcome: Option<JobOutcome>,
    last_record: Option<RunRecord>,
    runs: u32,
}

/// Runtime wrapper around a [`JobSpec`]: runs its task, classifies the
/// outcome, and applies the feedback policy.
///
/// The execution service calls [`run`](Self::run) from one of its workers.
/// A job may be rescheduled and run again, but never twice at the same time.
pub struct ManagedJob {
    id: Uuid,
    spec: JobSpec,
    run: Mutex<RunState>,
}

impl ManagedJob {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            run: Mutex::new(RunState {
                state: JobState::Idle,
                last_outcome: None,
                last_record: None,
                runs: 0,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn title(&self) -> &str {
        &self.spec.title
    }

    pub fn rule(&self) -> Option<&Arc<dyn SchedulingRule>> {
        self.spec.rule.as_ref()
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// Outcome of the most recent finished run; cleared when a new run starts.
    pub fn last_outcome(&self) -> Option<JobOutcome> {
        self.lock().last_outcome.clone()
    }

    pub fn last_record(&self) -> Option<RunRecord> {
        self.lock().last_record.clone()
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> u32 {
        self.lock().runs
    }

    /// True iff `family` equals this job's family (its title unless set).
    pub fn belongs_to(&self, family: &dyn Key) -> bool {
        self.spec.family.key_eq(family)
    }

    /// Hands the job to `service` for execution as soon as possible.
    pub fn schedule(self: &Arc<Self>, service: &dyn JobExecutionService) {
        self.notify_scheduled();
        info!(job_id = %self.id, title = %self.spec.title, "Job scheduled");
        service.submit(Arc::clone(self));
    }

    /// Hands the job to `service` for execution after `delay`.
    pub fn schedule_after(self: &Arc<Self>, service: &dyn JobExecutionService, delay: Duration) {
        self.notify_scheduled();
        info!(
            job_id = %self.id,
            title = %self.spec.title,
            delay_ms = delay.as_millis() as u64,
            "Job scheduled with delay"
        );
        service.submit_after(Arc::clone(self), delay);
    }

    /// Runs the task once and resolves the feedback for its outcome.
    ///
    /// Task errors and panics never escape: they become a
    /// [`JobOutcome::Failed`]. Fails with `IllegalState` only if this job is
    /// already running.
    pub fn run(&self, host: &dyn JobHost, progress: &dyn ProgressMonitor) -> Result<JobOutcome> {
        self.enter_running()?;
        let _unwind = UnwindGuard { job: self };
        let started_at = Utc::now();
        self.notify(|listener, event| listener.running(event), None);

        if let Some(icon) = &self.spec.icon {
            host.set_icon(icon);
        }
        host.set_error_prompt(feedback::error_prompt(self.spec.feedback.as_ref()));

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.spec.task.run(progress)));
        let outcome = self.classify(result);
        self.transition(outcome.terminal_state(), Some(outcome.clone()));

        // The dialog may have been closed while the task ran.
        host.set_error_prompt(feedback::error_prompt(self.spec.feedback.as_ref()));
        let foreground = self
            .spec
            .foreground_policy
            .is_foreground(host.is_in_dialog(), self.spec.kind);
        let delivery = feedback::delivery(self.spec.feedback.as_ref(), foreground);
        feedback::deliver(host, self.spec.feedback.as_ref(), delivery, &outcome);

        let record = self.record(&outcome, started_at);
        {
            let mut run = self.lock();
            run.state = JobState::FeedbackResolved;
            run.last_record = Some(record);
        }
        self.log_finished(&outcome, delivery);
        self.notify(|listener, event| listener.done(event), Some(outcome.clone()));
        Ok(outcome)
    }

    fn enter_running(&self) -> Result<()> {
        let mut run = self.lock();
        if !run.state.can_transition_to(JobState::Running) {
            warn!(job_id = %self.id, state = %run.state, "Rejected concurrent run");
            return Err(JobError::illegal_state(format!(
                "job '{}' cannot start while {}",
                self.spec.title, run.state
            )));
        }
        run.state = JobState::Running;
        run.last_outcome = None;
        run.runs += 1;
        debug!(job_id = %self.id, run = run.runs, "IDLE -> RUNNING");
        Ok(())
    }

    fn transition(&self, next: JobState, outcome: Option<JobOutcome>) {
        let mut run = self.lock();
        debug!(job_id = %self.id, from = %run.state, to = %next, "Job transition");
        run.state = next;
        run.last_outcome = outcome;
    }

    fn classify(&self, result: std::thread::Result<std::result::Result<(), TaskError>>) -> JobOutcome {
        let title = &self.spec.title;
        match result {
            Ok(Ok(())) => JobOutcome::Success {
                message: self.spec.completion_title.clone(),
            },
            Ok(Err(TaskError::Cancelled)) => JobOutcome::Cancelled {
                message: format!("Job '{title}' has been canceled."),
            },
            Ok(Err(TaskError::Invocation(cause) | TaskError::Failed(cause))) => {
                JobOutcome::Failed {
                    message: format!("Job '{title}' finished with error(s)."),
                    cause,
                }
            }
            Err(payload) => JobOutcome::Failed {
                message: format!("Job '{title}' finished with error(s)."),
                cause: Arc::new(TaskPanic::from_payload(payload)),
            },
        }
    }

    fn record(&self, outcome: &JobOutcome, started_at: DateTime<Utc>) -> RunRecord {
        let finished_at = Utc::now();
        RunRecord {
            job_id: self.id.to_string(),
            title: self.spec.title.clone(),
            severity: outcome.severity(),
            message: outcome.message().to_string(),
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        }
    }

    fn log_finished(&self, outcome: &JobOutcome, delivery: Delivery) {
        match outcome {
            JobOutcome::Failed { cause, .. } => warn!(
                job_id = %self.id,
                title = %self.spec.title,
                error = %cause,
                ?delivery,
                "Job failed"
            ),
            other => info!(
                job_id = %self.id,
                title = %self.spec.title,
                severity = %other.severity(),
                ?delivery,
                "Job finished"
            ),
        }
    }

    fn notify_scheduled(&self) {
        self.notify(|listener, event| listener.scheduled(event), None);
    }

    fn notify<F>(&self, f: F, outcome: Option<JobOutcome>)
    where
        F: FnOnce(&dyn crate::spec::JobChangeListener, &JobEvent),
    {
        if let Some(listener) = &self.spec.listener {
            let event = JobEvent {
                title: self.spec.title.clone(),
                outcome,
            };
            if panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref(), &event))).is_err() {
                warn!(job_id = %self.id, title = %self.spec.title, "Job change listener panicked");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Leaves a run that unwinds out of [`ManagedJob::run`] rerunnable.
struct UnwindGuard<'a> {
    job: &'a ManagedJob,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut run = self.job.lock();
        if run.state != JobState::FeedbackResolved {
            warn!(job_id = %self.job.id, state = %run.state, "Run unwound, resetting state");
            run.state = JobState::FeedbackResolved;
        }
    }
}

impl fmt::Debug for ManagedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedJob")
            .field("id", &self.id)
            .field("title", &self.spec.title)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::JobBuilder;
    use crate::executor::ErrorPrompt;
    use crate::executor::tests::RecordingHost;
    use crate::progress::NullProgress;
    use crate::spec::{Icon, JobChangeListener};
    use crate::task::Cancelled;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("checksum mismatch")]
    struct ChecksumMismatch;

    type Calls = Arc<Mutex<Vec<(String, bool)>>>;

    fn recording_callback() -> (Calls, impl Fn(&JobOutcome, bool) + Send + Sync + 'static) {
        let calls: Calls = Arc::default();
        let sink = Arc::clone(&calls);
        let callback = move |outcome: &JobOutcome, immediate: bool| {
            sink.lock()
                .unwrap()
                .push((outcome.message().to_string(), immediate));
        };
        (calls, callback)
    }

    #[test]
    fn success_uses_completion_title() {
        let job = JobBuilder::new()
            .title("Backup")
            .unwrap()
            .runnable(|| {})
            .build_job()
            .unwrap();
        let host = RecordingHost::default();

        let outcome = job.run(&host, &NullProgress::new()).unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.message(), "Finished 'Backup'.");
        assert_eq!(job.state(), JobState::FeedbackResolved);
        assert_eq!(
            host.prompts(),
            vec![ErrorPrompt::ShowImmediately, ErrorPrompt::ShowImmediately]
        );
    }

    #[test]
    fn failure_keeps_original_cause() {
        let job = JobBuilder::new()
            .title("Verify")
            .unwrap()
            .fallible(|| Err(ChecksumMismatch))
            .build_job()
            .unwrap();

        let outcome = job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();

        assert_eq!(outcome.severity(), Severity::Error);
        assert_eq!(outcome.message(), "Job 'Verify' finished with error(s).");
        let cause = outcome.cause().unwrap();
        assert!(cause.downcast_ref::<ChecksumMismatch>().is_some());
        assert_eq!(job.last_outcome().unwrap().severity(), Severity::Error);
    }

    #[test]
    fn direct_failure_from_progress_task() {
        let job = JobBuilder::new()
            .title("Import")
            .unwrap()
            .task_with_progress(|_| Err(TaskError::failed(ChecksumMismatch)))
            .build_job()
            .unwrap();

        let outcome = job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();

        let cause = outcome.cause().unwrap();
        assert!(cause.downcast_ref::<ChecksumMismatch>().is_some());
    }

    #[test]
    fn panic_in_progress_task_becomes_failure() {
        let job = JobBuilder::new()
            .task_with_progress(|_| panic!("index out of range"))
            .build_job()
            .unwrap();

        let outcome = job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();

        let cause = outcome.cause().unwrap();
        assert_eq!(
            cause.downcast_ref::<TaskPanic>().unwrap().message,
            "index out of range"
        );
    }

    #[test]
    fn cancellation_is_not_failure() {
        let job = JobBuilder::new()
            .title("Reindex")
            .unwrap()
            .task_with_progress(|progress| progress.check_cancelled())
            .build_job()
            .unwrap();
        let progress = NullProgress::new();
        progress.set_cancelled(true);

        let outcome = job.run(&RecordingHost::default(), &progress).unwrap();

        assert_eq!(outcome.severity(), Severity::Cancel);
        assert_eq!(outcome.message(), "Job 'Reindex' has been canceled.");
        assert!(outcome.cause().is_none());
    }

    #[test]
    fn fallible_cancel_marker_is_cancellation() {
        let job = JobBuilder::new()
            .fallible(|| Err(Cancelled))
            .build_job()
            .unwrap();

        let outcome = job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();
        assert_eq!(outcome.severity(), Severity::Cancel);
    }

    #[test]
    fn background_feedback_is_deferred() {
        let (calls, callback) = recording_callback();
        let job = JobBuilder::new()
            .title("Export")
            .unwrap()
            .runnable(|| {})
            .user_feedback(None, callback)
            .build_job()
            .unwrap();
        let host = RecordingHost::default();

        job.run(&host, &NullProgress::new()).unwrap();

        assert_eq!(host.run_ui(), 0);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(
            host.prompts(),
            vec![ErrorPrompt::Suppress, ErrorPrompt::Suppress]
        );

        let kept = host.kept();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].trigger());
        assert!(!kept[0].trigger());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![("Finished 'Export'.".to_string(), false)]
        );
    }

    #[test]
    fn foreground_feedback_is_immediate() {
        let (calls, callback) = recording_callback();
        let job = JobBuilder::new()
            .title("Export")
            .unwrap()
            .is_user_job()
            .runnable(|| {})
            .user_feedback(Some("Export done"), callback)
            .build_job()
            .unwrap();
        let host = RecordingHost::in_dialog();

        job.run(&host, &NullProgress::new()).unwrap();

        // Dispatched to the UI context, not run inline.
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(host.run_ui(), 1);
        assert!(host.kept().is_empty());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![("Export done".to_string(), true)]
        );
    }

    #[test]
    fn immediate_feedback_in_background() {
        let (calls, callback) = recording_callback();
        let job = JobBuilder::new()
            .title("Export")
            .unwrap()
            .runnable(|| {})
            .immediate_user_feedback(None, callback)
            .build_job()
            .unwrap();
        let host = RecordingHost::default();

        job.run(&host, &NullProgress::new()).unwrap();

        assert_eq!(host.run_ui(), 1);
        assert!(host.kept().is_empty());
        assert_eq!(calls.lock().unwrap()[0].1, true);
    }

    #[test]
    fn never_policy_defers_even_in_dialog() {
        let (calls, callback) = recording_callback();
        let job = JobBuilder::new()
            .runnable(|| {})
            .user_feedback(None, callback)
            .foreground_policy(crate::config::ForegroundPolicy::Never)
            .build_job()
            .unwrap();
        let host = RecordingHost::in_dialog();

        job.run(&host, &NullProgress::new()).unwrap();

        assert_eq!(host.run_ui(), 0);
        assert!(host.kept()[0].trigger());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![("Finished operation".to_string(), false)]
        );
    }

    #[test]
    fn icon_is_attached_before_running() {
        let job = JobBuilder::new()
            .icon(Icon::new("icons/backup.png"))
            .runnable(|| {})
            .build_job()
            .unwrap();
        let host = RecordingHost::default();

        job.run(&host, &NullProgress::new()).unwrap();

        assert_eq!(
            *host.icons.lock().unwrap(),
            vec![Icon::new("icons/backup.png")]
        );
    }

    #[test]
    fn rerun_clears_previous_outcome() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let job = JobBuilder::new()
            .fallible(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ChecksumMismatch)
                } else {
                    Ok(())
                }
            })
            .build_job()
            .unwrap();
        let host = RecordingHost::default();

        let first = job.run(&host, &NullProgress::new()).unwrap();
        let second = job.run(&host, &NullProgress::new()).unwrap();

        assert_eq!(first.severity(), Severity::Error);
        assert!(second.is_success());
        assert!(job.last_outcome().unwrap().is_success());
        assert_eq!(job.runs(), 2);
    }

    #[test]
    fn concurrent_run_is_rejected() {
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let job = Arc::new(
            JobBuilder::new()
                .runnable(move || {
                    let _ = started_tx.send(());
                    let _ = release_rx.lock().unwrap().recv();
                })
                .build_job()
                .unwrap(),
        );

        let worker = {
            let job = Arc::clone(&job);
            std::thread::spawn(move || job.run(&RecordingHost::default(), &NullProgress::new()))
        };
        started_rx.recv().unwrap();

        let err = job
            .run(&RecordingHost::default(), &NullProgress::new())
            .unwrap_err();
        assert!(matches!(err, JobError::IllegalState(_)));

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap().unwrap().is_success());
    }

    #[test]
    fn belongs_to_family_or_title() {
        let by_title = JobBuilder::new()
            .title("Backup")
            .unwrap()
            .runnable(|| {})
            .build_job()
            .unwrap();
        assert!(by_title.belongs_to(&"Backup".to_string()));
        assert!(!by_title.belongs_to(&"Restore".to_string()));

        let by_family = JobBuilder::new()
            .title("Backup")
            .unwrap()
            .family(42_u32)
            .runnable(|| {})
            .build_job()
            .unwrap();
        assert!(by_family.belongs_to(&42_u32));
        assert!(!by_family.belongs_to(&"Backup".to_string()));
    }

    #[test]
    fn listener_sees_lifecycle() {
        #[derive(Default)]
        struct Counting {
            running: AtomicUsize,
            done: Mutex<Vec<Severity>>,
        }

        impl JobChangeListener for Counting {
            fn running(&self, _event: &JobEvent) {
                self.running.fetch_add(1, Ordering::SeqCst);
            }

            fn done(&self, event: &JobEvent) {
                let severity = event.outcome.as_ref().map(JobOutcome::severity).unwrap();
                self.done.lock().unwrap().push(severity);
            }
        }

        let listener = Arc::new(Counting::default());
        let job = JobBuilder::new()
            .runnable(|| {})
            .on_change(listener.clone())
            .build_job()
            .unwrap();

        job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();

        assert_eq!(listener.running.load(Ordering::SeqCst), 1);
        assert_eq!(*listener.done.lock().unwrap(), vec![Severity::Ok]);
    }

    #[test]
    fn panicking_listener_does_not_break_run() {
        struct Exploding;

        impl JobChangeListener for Exploding {
            fn running(&self, _event: &JobEvent) {
                panic!("listener bug");
            }

            fn done(&self, _event: &JobEvent) {
                panic!("listener bug");
            }
        }

        let job = JobBuilder::new()
            .runnable(|| {})
            .on_change(Arc::new(Exploding))
            .build_job()
            .unwrap();

        let outcome = job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();
        assert!(outcome.is_success());
        assert_eq!(job.state(), JobState::FeedbackResolved);

        job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();
        assert_eq!(job.runs(), 2);
    }

    #[test]
    fn panicking_host_leaves_job_rerunnable() {
        struct BrokenHost(RecordingHost);

        impl JobHost for BrokenHost {
            fn is_in_dialog(&self) -> bool {
                self.0.is_in_dialog()
            }

            fn set_icon(&self, _icon: &Icon) {
                panic!("icon store unavailable");
            }

            fn set_error_prompt(&self, prompt: ErrorPrompt) {
                self.0.set_error_prompt(prompt);
            }

            fn dispatch_ui(&self, action: Box<dyn FnOnce() + Send>) {
                self.0.dispatch_ui(action);
            }

            fn keep_with_action(&self, action: crate::executor::DeferredAction) {
                self.0.keep_with_action(action);
            }
        }

        let job = JobBuilder::new()
            .icon(Icon::new("icons/sync.png"))
            .runnable(|| {})
            .build_job()
            .unwrap();

        let host = BrokenHost(RecordingHost::default());
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            job.run(&host, &NullProgress::new())
        }));
        assert!(unwound.is_err());
        assert_ne!(job.state(), JobState::Running);

        let outcome = job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();
        assert!(outcome.is_success());
    }

    #[test]
    fn run_record_is_serializable() {
        let job = JobBuilder::new()
            .title("Backup")
            .unwrap()
            .runnable(|| {})
            .build_job()
            .unwrap();
        job.run(&RecordingHost::default(), &NullProgress::new()).unwrap();

        let record = job.last_record().unwrap();
        assert_eq!(record.job_id, job.id().to_string());
        assert_eq!(record.severity, Severity::Ok);
        assert!(record.duration_ms >= 0);

        let json = serde_json::to_string(&record).unwrap();
        let back: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "Finished 'Backup'.");
    }
}
