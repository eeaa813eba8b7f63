//! Terminal presentation for the demo binary: spinners and colored output.
//!
//! [`SpinnerProgress`] is the progress handle the binary gives every job it
//! submits. It draws with `indicatif` and styles with `console`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::progress::ProgressMonitor;
use crate::state_machine::{JobOutcome, RunRecord, Severity};

/// Progress monitor backed by a terminal spinner.
///
/// Turns into a bar once the task announces how much work it has.
pub struct SpinnerProgress {
    pb: ProgressBar,
    cancelled: AtomicBool,
}

impl SpinnerProgress {
    pub fn new(title: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(spinner_style());
        pb.set_message(format!("WAITING: {title}"));
        pb.enable_steady_tick(Duration::from_millis(100));
        Self {
            pb,
            cancelled: AtomicBool::new(false),
        }
    }

    /// A monitor that draws nothing, for non-interactive output.
    pub fn hidden() -> Self {
        Self {
            pb: ProgressBar::hidden(),
            cancelled: AtomicBool::new(false),
        }
    }
}

impl ProgressMonitor for SpinnerProgress {
    fn begin_task(&self, name: &str, total: Option<u64>) {
        if let Some(total) = total {
            self.pb.set_length(total);
            self.pb.set_style(bar_style());
        }
        self.pb.set_message(name.to_string());
    }

    fn worked(&self, units: u64) {
        self.pb.inc(units);
    }

    fn sub_task(&self, name: &str) {
        self.pb.set_message(name.to_string());
    }

    fn done(&self) {
        self.pb.finish_and_clear();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::Release);
        if cancelled {
            self.pb.set_message("cancelling...");
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn severity_style(severity: Severity) -> Style {
    match severity {
        Severity::Ok => Style::new().green().bold(),
        Severity::Cancel => Style::new().yellow(),
        Severity::Error => Style::new().red().bold(),
    }
}

/// Prints the outcome of a run: green check, yellow dash, or red cross.
pub fn print_outcome(outcome: &JobOutcome, immediate: bool) {
    let style = severity_style(outcome.severity());
    let mark = match outcome.severity() {
        Severity::Ok => "✓",
        Severity::Cancel => "–",
        Severity::Error => "✗",
    };
    let when = if immediate { "" } else { " (on request)" };
    println!("  {} {outcome}{when}", style.apply_to(mark));
}

/// Prints the run record as pretty JSON under a colored header.
pub fn print_record(record: &RunRecord) {
    let style = severity_style(record.severity);
    println!();
    println!("{}", style.apply_to("─── Run Record ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(record).unwrap_or_default()
    );
}
