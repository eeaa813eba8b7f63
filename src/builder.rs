//! Fluent builder for [`JobSpec`] and [`ManagedJob`].
//!
//! Setters validate eagerly, so misconfiguration fails at the call that
//! caused it and never reaches the execution service:
//!
//! ```ignore
//! let job = JobBuilder::new()
//!     .title("Backup")?
//!     .high_priority()
//!     .runs_exclusively_on("db-lock")
//!     .runnable(|| backup())
//!     .build_and_schedule(&executor)?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ForegroundPolicy, JobsConfig};
use crate::error::{JobError, Result, TaskError};
use crate::executor::JobExecutionService;
use crate::progress::ProgressMonitor;
use crate::rule::{ConflictRule, Key, SchedulingRule, SharedKey};
use crate::spec::{
    DEFAULT_TITLE, FeedbackSpec, Icon, JobChangeListener, JobKind, JobSpec, Priority,
    derive_completion_title,
};
use crate::state_machine::{JobOutcome, ManagedJob};
use crate::task::{BoxError, ProgressTask, Task, TaskShape, classify_error};

/// Unit for [`JobBuilder::build_and_schedule_after`] delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
}

impl TimeUnit {
    /// Converts a non-negative amount of this unit into a [`Duration`].
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
        }
    }
}

/// Where the exclusivity rule comes from; the last setter wins.
#[derive(Clone)]
enum RuleSource {
    Rule(Arc<dyn SchedulingRule>),
    Lock(SharedKey),
    /// Lock on the title, resolved at build time.
    Title,
}

#[derive(Clone)]
struct PendingFeedback {
    completion_title: Option<String>,
    spec: FeedbackSpec,
}

/// Accumulates job configuration until [`build`](Self::build).
#[derive(Clone)]
pub struct JobBuilder {
    title: String,
    default_title: String,
    family: Option<SharedKey>,
    task: Option<TaskShape>,
    kind: JobKind,
    priority: Option<Priority>,
    icon: Option<Icon>,
    feedback: Option<PendingFeedback>,
    listener: Option<Arc<dyn JobChangeListener>>,
    rule: Option<RuleSource>,
    foreground_policy: ForegroundPolicy,
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            default_title: DEFAULT_TITLE.to_string(),
            family: None,
            task: None,
            kind: JobKind::Default,
            priority: None,
            icon: None,
            feedback: None,
            listener: None,
            rule: None,
            foreground_policy: ForegroundPolicy::default(),
        }
    }

    /// Starts from the defaults in `config`.
    pub fn with_config(config: &JobsConfig) -> Self {
        let mut builder = Self::new();
        if !config.default_title.trim().is_empty() {
            builder.title = config.default_title.clone();
            builder.default_title = config.default_title.clone();
        }
        builder.foreground_policy = config.foreground_policy;
        builder
    }

    /// Shortcut for a titled job running a plain closure.
    pub fn titled<F>(title: impl Into<String>, runnable: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut builder = Self::new();
        builder.title(title)?.runnable(runnable);
        Ok(builder)
    }

    /// Sets the title shown by the execution service. Blank titles are rejected
    /// and leave the current title in place.
    pub fn title(&mut self, title: impl Into<String>) -> Result<&mut Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(JobError::invalid_argument("the job title is blank"));
        }
        self.title = title;
        Ok(self)
    }

    /// Runs a closure that neither fails nor reports progress.
    ///
    /// A panic inside it ends the job as failed. Replaces any earlier task.
    pub fn runnable<F>(&mut self, runnable: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.task = Some(TaskShape::Plain(Arc::new(runnable)));
        self
    }

    /// Runs a closure that may fail. Return [`Cancelled`](crate::task::Cancelled)
    /// to end the job as cancelled rather than failed.
    pub fn fallible<F, E>(&mut self, runnable: F) -> &mut Self
    where
        F: Fn() -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let body = move || runnable().map_err(classify_error);
        self.task = Some(TaskShape::Fallible(Arc::new(body)));
        self
    }

    /// Runs a task that manages its own progress reporting and cancellation.
    pub fn task<T>(&mut self, task: T) -> &mut Self
    where
        T: Task + 'static,
    {
        self.task = Some(TaskShape::Progress(Arc::new(task)));
        self
    }

    pub fn task_with_progress<F>(&mut self, body: F) -> &mut Self
    where
        F: Fn(&dyn ProgressMonitor) -> std::result::Result<(), TaskError> + Send + Sync + 'static,
    {
        self.task(ProgressTask::new(body))
    }

    pub fn kind(&mut self, kind: JobKind) -> &mut Self {
        self.kind = kind;
        self
    }

    /// System jobs are hidden from the service's progress views by default.
    pub fn is_system_job(&mut self) -> &mut Self {
        self.kind(JobKind::System)
    }

    /// User jobs may be shown in a blocking progress view.
    pub fn is_user_job(&mut self) -> &mut Self {
        self.kind(JobKind::User)
    }

    pub fn priority(&mut self, priority: Priority) -> &mut Self {
        self.priority = Some(priority);
        self
    }

    pub fn high_priority(&mut self) -> &mut Self {
        self.priority(Priority::High)
    }

    pub fn low_priority(&mut self) -> &mut Self {
        self.priority(Priority::Low)
    }

    pub fn lowest_priority(&mut self) -> &mut Self {
        self.priority(Priority::Lowest)
    }

    /// Groups the job for bulk cancel, find, and join. Defaults to the title.
    pub fn family<K: Key>(&mut self, family: K) -> &mut Self {
        self.family = Some(Arc::new(family));
        self
    }

    pub fn icon(&mut self, icon: Icon) -> &mut Self {
        self.icon = Some(icon);
        self
    }

    /// Delivers the outcome to `callback`: immediately while the user watches
    /// the job, otherwise behind a follow-up action the user triggers later.
    ///
    /// A blank `completion_title` is derived from the job title at build time.
    pub fn user_feedback<F>(&mut self, completion_title: Option<&str>, callback: F) -> &mut Self
    where
        F: Fn(&JobOutcome, bool) + Send + Sync + 'static,
    {
        self.set_feedback(completion_title, callback, false)
    }

    /// Like [`user_feedback`](Self::user_feedback) but always delivers right away.
    pub fn immediate_user_feedback<F>(
        &mut self,
        completion_title: Option<&str>,
        callback: F,
    ) -> &mut Self
    where
        F: Fn(&JobOutcome, bool) + Send + Sync + 'static,
    {
        self.set_feedback(completion_title, callback, true)
    }

    pub fn gives_immediate_user_feedback<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&JobOutcome, bool) + Send + Sync + 'static,
    {
        self.set_feedback(None, callback, true)
    }

    fn set_feedback<F>(
        &mut self,
        completion_title: Option<&str>,
        callback: F,
        deliver_immediately: bool,
    ) -> &mut Self
    where
        F: Fn(&JobOutcome, bool) + Send + Sync + 'static,
    {
        self.feedback = Some(PendingFeedback {
            completion_title: completion_title.map(str::to_string),
            spec: FeedbackSpec {
                callback: Arc::new(callback),
                deliver_immediately,
            },
        });
        self
    }

    /// Sets the exclusivity rule. Replaces any earlier `runs_exclusively_on`.
    pub fn conflict_rule(&mut self, rule: Arc<dyn SchedulingRule>) -> &mut Self {
        self.rule = Some(RuleSource::Rule(rule));
        self
    }

    /// Never runs alongside another job locked on an equal key.
    pub fn runs_exclusively_on<K: Key>(&mut self, lock: K) -> &mut Self {
        self.rule = Some(RuleSource::Lock(Arc::new(lock)));
        self
    }

    /// Never runs alongside another job with the same title.
    pub fn runs_not_concurrently(&mut self) -> &mut Self {
        self.rule = Some(RuleSource::Title);
        self
    }

    pub fn on_change(&mut self, listener: Arc<dyn JobChangeListener>) -> &mut Self {
        self.listener = Some(listener);
        self
    }

    pub fn foreground_policy(&mut self, policy: ForegroundPolicy) -> &mut Self {
        self.foreground_policy = policy;
        self
    }

    /// Freezes the configuration. Fails with `IllegalState` when no task is set.
    pub fn build(&self) -> Result<JobSpec> {
        if self.title.trim().is_empty() {
            return Err(JobError::illegal_state("the job title is empty"));
        }
        let shape = self
            .task
            .as_ref()
            .ok_or_else(|| JobError::illegal_state("the job's task is not set"))?;

        // A configured default title derives the same text as the built-in one.
        let base_title = if self.title == self.default_title {
            DEFAULT_TITLE
        } else {
            self.title.as_str()
        };
        let completion_title = derive_completion_title(
            base_title,
            self.feedback
                .as_ref()
                .and_then(|f| f.completion_title.as_deref()),
        );

        let rule: Option<Arc<dyn SchedulingRule>> = match &self.rule {
            None => None,
            Some(RuleSource::Rule(rule)) => Some(Arc::clone(rule)),
            Some(RuleSource::Lock(lock)) => {
                Some(Arc::new(ConflictRule::from_shared(Arc::clone(lock))))
            }
            Some(RuleSource::Title) => Some(Arc::new(ConflictRule::new(self.title.clone()))),
        };

        Ok(JobSpec {
            title: self.title.clone(),
            family: self
                .family
                .clone()
                .unwrap_or_else(|| Arc::new(self.title.clone())),
            task: shape.adapt(&self.title),
            kind: self.kind,
            priority: self.priority,
            icon: self.icon.clone(),
            completion_title,
            feedback: self.feedback.as_ref().map(|f| f.spec.clone()),
            listener: self.listener.clone(),
            rule,
            foreground_policy: self.foreground_policy,
        })
    }

    /// Builds the [`JobSpec`] and wraps it in a job ready for scheduling.
    pub fn build_job(&self) -> Result<ManagedJob> {
        Ok(ManagedJob::new(self.build()?))
    }

    /// Builds the job and submits it to `service` right away.
    pub fn build_and_schedule(&self, service: &dyn JobExecutionService) -> Result<Arc<ManagedJob>> {
        let job = Arc::new(self.build_job()?);
        job.schedule(service);
        Ok(job)
    }

    /// Builds the job and submits it to `service` after `delay` units.
    ///
    /// A negative delay is rejected before anything is built.
    pub fn build_and_schedule_after(
        &self,
        service: &dyn JobExecutionService,
        delay: i64,
        unit: TimeUnit,
    ) -> Result<Arc<ManagedJob>> {
        let delay = u64::try_from(delay).map_err(|_| {
            JobError::invalid_argument(format!("the delay must not be negative, got {delay}"))
        })?;
        let job = Arc::new(self.build_job()?);
        job.schedule_after(service, unit.to_duration(delay));
        Ok(job)
    }
}

impl fmt::Debug for JobBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBuilder")
            .field("title", &self.title)
            .field("task", &self.task)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Service double that records submissions without running anything.
    #[derive(Default)]
    struct RecordingService {
        submitted: Mutex<Vec<(String, Option<Duration>)>>,
    }

    impl JobExecutionService for RecordingService {
        fn submit(&self, job: Arc<ManagedJob>) {
            self.submitted
                .lock()
                .unwrap()
                .push((job.title().to_string(), None));
        }

        fn submit_after(&self, job: Arc<ManagedJob>, delay: Duration) {
            self.submitted
                .lock()
                .unwrap()
                .push((job.title().to_string(), Some(delay)));
        }
    }

    #[test]
    fn build_with_defaults() {
        let spec = JobBuilder::new().runnable(|| {}).build().unwrap();

        assert_eq!(spec.title(), "Operation in progress...");
        assert_eq!(spec.completion_title(), "Finished operation");
        assert_eq!(spec.kind(), JobKind::Default);
        assert!(spec.priority().is_none());
        assert!(spec.feedback().is_none());
        assert!(spec.rule().is_none());
        assert!(spec.family().key_eq(&"Operation in progress...".to_string()));
    }

    #[test]
    fn build_without_task_is_illegal_state() {
        let err = JobBuilder::new().title("Backup").unwrap().build().unwrap_err();
        assert!(matches!(err, JobError::IllegalState(_)));
    }

    #[test]
    fn blank_titles_are_rejected_and_default_kept() {
        let mut builder = JobBuilder::new();
        for blank in ["", " ", "\t\n"] {
            let err = builder.title(blank).unwrap_err();
            assert!(matches!(err, JobError::InvalidArgument(_)));
        }
        let spec = builder.runnable(|| {}).build().unwrap();
        assert_eq!(spec.title(), DEFAULT_TITLE);
    }

    #[test]
    fn derives_completion_title_from_title() {
        let spec = JobBuilder::new()
            .title("Backup")
            .unwrap()
            .runnable(|| {})
            .build()
            .unwrap();
        assert_eq!(spec.completion_title(), "Finished 'Backup'.");
    }

    #[test]
    fn blank_completion_title_is_derived() {
        let spec = JobBuilder::new()
            .title("Backup")
            .unwrap()
            .runnable(|| {})
            .user_feedback(Some("   "), |_, _| {})
            .build()
            .unwrap();
        assert_eq!(spec.completion_title(), "Finished 'Backup'.");
        assert!(!spec.feedback().unwrap().deliver_immediately);
    }

    #[test]
    fn explicit_completion_title_wins() {
        let spec = JobBuilder::new()
            .title("Backup")
            .unwrap()
            .runnable(|| {})
            .immediate_user_feedback(Some("Backup: Done."), |_, _| {})
            .build()
            .unwrap();
        assert_eq!(spec.completion_title(), "Backup: Done.");
        assert!(spec.feedback().unwrap().deliver_immediately);
    }

    #[test]
    fn configured_default_title_counts_as_default() {
        let config = JobsConfig {
            default_title: "Working...".into(),
            foreground_policy: ForegroundPolicy::Never,
            ..JobsConfig::default()
        };
        let spec = JobBuilder::with_config(&config)
            .runnable(|| {})
            .build()
            .unwrap();
        assert_eq!(spec.title(), "Working...");
        assert_eq!(spec.completion_title(), "Finished operation");
        assert_eq!(spec.foreground_policy(), ForegroundPolicy::Never);
    }

    #[test]
    fn last_kind_and_priority_win() {
        let spec = JobBuilder::new()
            .is_user_job()
            .is_system_job()
            .high_priority()
            .lowest_priority()
            .runnable(|| {})
            .build()
            .unwrap();
        assert_eq!(spec.kind(), JobKind::System);
        assert_eq!(spec.priority(), Some(Priority::Lowest));
    }

    #[test]
    fn last_task_wins() {
        let spec = JobBuilder::new()
            .runnable(|| panic!("replaced"))
            .task_with_progress(|_| Ok(()))
            .build()
            .unwrap();
        let progress = crate::progress::NullProgress::new();
        assert!(spec.task().run(&progress).is_ok());
    }

    #[test]
    fn last_rule_setter_wins() {
        let spec = JobBuilder::new()
            .conflict_rule(Arc::new(ConflictRule::new("a")))
            .runs_exclusively_on("db-lock")
            .runnable(|| {})
            .build()
            .unwrap();
        let expected = ConflictRule::new("db-lock");
        assert!(spec.rule().unwrap().is_conflicting(&expected));

        let spec = JobBuilder::new()
            .runs_exclusively_on("db-lock")
            .conflict_rule(Arc::new(ConflictRule::new("a")))
            .runnable(|| {})
            .build()
            .unwrap();
        assert!(!spec.rule().unwrap().is_conflicting(&expected));
    }

    #[test]
    fn runs_not_concurrently_locks_on_title() {
        let spec = JobBuilder::new()
            .runs_not_concurrently()
            .title("Compact")
            .unwrap()
            .runnable(|| {})
            .build()
            .unwrap();
        let same_title = ConflictRule::new("Compact".to_string());
        assert!(spec.rule().unwrap().is_conflicting(&same_title));
    }

    #[test]
    fn titled_shortcut() {
        let spec = JobBuilder::titled("Backup", || {}).unwrap().build().unwrap();
        assert_eq!(spec.title(), "Backup");
        assert!(JobBuilder::titled(" ", || {}).is_err());
    }

    #[test]
    fn build_and_schedule_submits() {
        let service = RecordingService::default();
        let job = JobBuilder::new()
            .title("Backup")
            .unwrap()
            .runnable(|| {})
            .build_and_schedule(&service)
            .unwrap();

        assert_eq!(job.title(), "Backup");
        assert_eq!(
            *service.submitted.lock().unwrap(),
            vec![("Backup".to_string(), None)]
        );
    }

    #[test]
    fn build_and_schedule_after_converts_units() {
        let service = RecordingService::default();
        JobBuilder::new()
            .runnable(|| {})
            .build_and_schedule_after(&service, 2, TimeUnit::Seconds)
            .unwrap();

        assert_eq!(
            service.submitted.lock().unwrap()[0].1,
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn negative_delay_is_rejected() {
        let service = RecordingService::default();
        let err = JobBuilder::new()
            .runnable(|| {})
            .build_and_schedule_after(&service, -1, TimeUnit::Milliseconds)
            .unwrap_err();

        assert!(matches!(err, JobError::InvalidArgument(_)));
        assert!(service.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn build_and_schedule_without_task_submits_nothing() {
        let service = RecordingService::default();
        let err = JobBuilder::new().build_and_schedule(&service).unwrap_err();
        assert!(matches!(err, JobError::IllegalState(_)));
        assert!(service.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn time_unit_conversion() {
        assert_eq!(
            TimeUnit::Milliseconds.to_duration(250),
            Duration::from_millis(250)
        );
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
    }
}
