mod feedback;
mod job;
mod state;

pub use feedback::{Delivery, delivery, error_prompt};
pub use job::{ManagedJob, RunRecord};
pub use state::{JobOutcome, JobState, Severity};
