mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, RunArgs};
use jobs_builder::ui::{self, SpinnerProgress};
use jobs_builder::{
    JobBuilder, JobChangeListener, JobEvent, JobOutcome, JobsConfig, LocalExecutor, ManagedJob,
    ProgressMonitor, TaskError, TimeUnit, logging,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => JobsConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => JobsConfig::load().context("failed to load jobs.toml")?,
    };
    let filter = if cli.verbose {
        "debug"
    } else {
        config.log_filter.as_str()
    };
    logging::init(filter);

    match cli.command {
        Command::Run(args) => run_one(&config, args).await,
        Command::Demo => demo(&config).await,
    }
}

fn print_feedback(outcome: &JobOutcome, immediate: bool) {
    ui::print_outcome(outcome, immediate);
}

async fn run_one(config: &JobsConfig, args: RunArgs) -> Result<()> {
    let executor = LocalExecutor::with_progress_factory(|job| {
        Arc::new(SpinnerProgress::new(job.title())) as Arc<dyn ProgressMonitor>
    })?;
    if args.in_dialog {
        executor.set_in_dialog(args.title.clone(), true);
    }

    let mut builder = JobBuilder::with_config(config);
    builder.title(args.title.clone())?;

    let label = args.title.clone();
    let steps = args.steps;
    let fail = args.fail;
    builder.task_with_progress(move |progress| {
        progress.begin_task(&label, Some(steps));
        for step in 1..=steps {
            if progress.is_cancelled() {
                progress.done();
                return Err(TaskError::Cancelled);
            }
            progress.sub_task(&format!("{label}: step {step}/{steps}"));
            std::thread::sleep(Duration::from_millis(100));
            progress.worked(1);
        }
        progress.done();
        if fail {
            return Err(TaskError::failed(std::io::Error::other(
                "simulated failure",
            )));
        }
        Ok(())
    });

    if args.immediate {
        builder.immediate_user_feedback(None, print_feedback);
    } else {
        builder.user_feedback(None, print_feedback);
    }
    if let Some(key) = args.exclusive.clone() {
        builder.runs_exclusively_on(key);
    }

    let job = builder.build_and_schedule_after(&executor, args.delay_ms, TimeUnit::Milliseconds)?;

    if let Some(ms) = args.cancel_after_ms {
        let canceller = executor.clone();
        let family = args.title.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            canceller.cancel_family(&family);
        });
    }

    finish(&executor, &[job]).await;
    Ok(())
}

async fn demo(config: &JobsConfig) -> Result<()> {
    let executor = LocalExecutor::new()?;
    let listener: Arc<dyn JobChangeListener> = Arc::new(PrintListener);
    let mut jobs = Vec::new();

    for (title, ms) in [("Migrate schema", 300), ("Vacuum tables", 200)] {
        let job = JobBuilder::with_config(config)
            .title(title)?
            .is_system_job()
            .runs_exclusively_on("db-lock")
            .on_change(Arc::clone(&listener))
            .runnable(move || std::thread::sleep(Duration::from_millis(ms)))
            .build_and_schedule(&executor)?;
        jobs.push(job);
    }

    jobs.push(
        JobBuilder::with_config(config)
            .title("Fetch mirrors")?
            .high_priority()
            .on_change(Arc::clone(&listener))
            .fallible(|| -> anyhow::Result<()> { anyhow::bail!("mirror unreachable") })
            .gives_immediate_user_feedback(print_feedback)
            .build_and_schedule(&executor)?,
    );

    jobs.push(
        JobBuilder::with_config(config)
            .title("Export report")?
            .is_user_job()
            .on_change(Arc::clone(&listener))
            .runnable(|| std::thread::sleep(Duration::from_millis(100)))
            .user_feedback(Some("Report ready"), print_feedback)
            .build_and_schedule_after(&executor, 50, TimeUnit::Milliseconds)?,
    );

    finish(&executor, &jobs).await;
    Ok(())
}

/// Waits for every job, opens deferred feedback, and prints the run records.
async fn finish(executor: &LocalExecutor, jobs: &[Arc<ManagedJob>]) {
    executor.join_all().await;
    executor.flush_ui().await;

    for kept in executor.kept() {
        info!(title = %kept.title, "Opening deferred feedback");
        executor.trigger_kept(&kept.title);
    }
    executor.flush_ui().await;

    for job in jobs {
        if let Some(record) = job.last_record() {
            ui::print_record(&record);
        }
    }
}

struct PrintListener;

impl JobChangeListener for PrintListener {
    fn scheduled(&self, event: &JobEvent) {
        println!("  · scheduled {}", event.title);
    }

    fn running(&self, event: &JobEvent) {
        println!("  · running   {}", event.title);
    }
}
