//! Progress handle passed to running tasks.
//!
//! The execution service owns the concrete monitor. Tasks report work through
//! it and poll it for cancellation; nothing in this crate interrupts a task.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TaskError;

pub trait ProgressMonitor: Send + Sync {
    /// Starts the main task. `total` of `None` means the amount of work is unknown.
    fn begin_task(&self, name: &str, total: Option<u64>);

    fn worked(&self, _units: u64) {}

    fn sub_task(&self, _name: &str) {}

    /// Marks the main task as finished. Must follow every `begin_task`.
    fn done(&self);

    fn is_cancelled(&self) -> bool;

    fn set_cancelled(&self, cancelled: bool);

    /// Returns `Err(TaskError::Cancelled)` once cancellation was requested.
    fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Monitor that reports nothing and only tracks the cancellation flag.
#[derive(Debug, Default)]
pub struct NullProgress {
    cancelled: AtomicBool,
}

impl NullProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressMonitor for NullProgress {
    fn begin_task(&self, _name: &str, _total: Option<u64>) {}

    fn done(&self) {}

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call so tests can assert begin/done balance.
    #[derive(Default)]
    pub(crate) struct RecordingProgress {
        pub(crate) calls: Mutex<Vec<String>>,
        cancelled: AtomicBool,
    }

    impl RecordingProgress {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProgressMonitor for RecordingProgress {
        fn begin_task(&self, name: &str, total: Option<u64>) {
            let total = total.map_or("unknown".to_string(), |t| t.to_string());
            self.calls
                .lock()
                .unwrap()
                .push(format!("begin:{name}:{total}"));
        }

        fn done(&self) {
            self.calls.lock().unwrap().push("done".to_string());
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::Acquire)
        }

        fn set_cancelled(&self, cancelled: bool) {
            self.cancelled.store(cancelled, Ordering::Release);
        }
    }

    #[test]
    fn null_progress_tracks_cancellation() {
        let progress = NullProgress::new();
        assert!(progress.check_cancelled().is_ok());

        progress.set_cancelled(true);
        assert!(progress.is_cancelled());
        assert!(matches!(
            progress.check_cancelled(),
            Err(TaskError::Cancelled)
        ));
    }
}
