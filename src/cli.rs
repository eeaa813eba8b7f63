//! Command line interface of the demo binary, based on clap.
//!
//! [`Cli`] carries the [`Command`] subcommands (run, demo) and the global
//! flags (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// jobs-builder: build, schedule, and watch background jobs from the terminal.
#[derive(Debug, Parser)]
#[command(name = "jobs-builder", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file to use instead of ./jobs.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enables debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Builds one job, runs it, and reports the outcome.
    Run(RunArgs),

    /// Schedules a set of sample jobs and reports their results.
    Demo,
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    /// Title of the job.
    pub title: String,

    /// Make the task fail with an error.
    #[arg(long)]
    pub fail: bool,

    /// Request cancellation after this many milliseconds.
    #[arg(long, value_name = "MS")]
    pub cancel_after_ms: Option<u64>,

    /// Units of work the task reports.
    #[arg(long, default_value_t = 10)]
    pub steps: u64,

    /// Deliver feedback as soon as the job finishes.
    #[arg(long)]
    pub immediate: bool,

    /// Run the job as if the user watched it in a modal view.
    #[arg(long)]
    pub in_dialog: bool,

    /// Wait this many milliseconds before starting the job.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub delay_ms: i64,

    /// Lock key the job runs exclusively on.
    #[arg(long, value_name = "KEY")]
    pub exclusive: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["jobs-builder", "run", "Backup"]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.title, "Backup");
                assert!(!args.fail);
                assert_eq!(args.steps, 10);
                assert_eq!(args.delay_ms, 0);
                assert!(args.exclusive.is_none());
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "jobs-builder",
            "run",
            "Backup",
            "--fail",
            "--cancel-after-ms",
            "50",
            "--steps",
            "3",
            "--immediate",
            "--in-dialog",
            "--delay-ms",
            "20",
            "--exclusive",
            "db-lock",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected Run command");
        };
        assert!(args.fail);
        assert_eq!(args.cancel_after_ms, Some(50));
        assert_eq!(args.steps, 3);
        assert!(args.immediate);
        assert!(args.in_dialog);
        assert_eq!(args.delay_ms, 20);
        assert_eq!(args.exclusive.as_deref(), Some("db-lock"));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["jobs-builder", "--config", "custom.toml", "--verbose", "demo"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
