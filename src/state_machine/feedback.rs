//! When and how a finished job tells the user about its outcome.
//!
//! The platform's own error prompt is suppressed exactly when the job delivers
//! feedback itself, so the two never fire for the same outcome.

use crate::executor::{DeferredAction, ErrorPrompt, JobHost};
use crate::spec::FeedbackSpec;
use crate::state_machine::JobOutcome;

/// How the feedback for one finished run is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No feedback configured.
    None,
    /// Invoke the callback on the UI context as soon as the run ends.
    Immediate,
    /// Keep the job visible; the callback runs when the user asks for it.
    Deferred,
}

pub fn error_prompt(feedback: Option<&FeedbackSpec>) -> ErrorPrompt {
    match feedback {
        Some(_) => ErrorPrompt::Suppress,
        None => ErrorPrompt::ShowImmediately,
    }
}

pub fn delivery(feedback: Option<&FeedbackSpec>, foreground: bool) -> Delivery {
    match feedback {
        None => Delivery::None,
        Some(spec) if foreground || spec.deliver_immediately => Delivery::Immediate,
        Some(_) => Delivery::Deferred,
    }
}

/// Hands `outcome` to the feedback callback according to `delivery`.
///
/// Called once per run; each branch invokes the callback at most once.
pub(crate) fn deliver(
    host: &dyn JobHost,
    feedback: Option<&FeedbackSpec>,
    delivery: Delivery,
    outcome: &JobOutcome,
) {
    let Some(spec) = feedback else {
        return;
    };
    let callback = spec.callback.clone();
    let outcome = outcome.clone();
    match delivery {
        Delivery::None => {}
        Delivery::Immediate => host.dispatch_ui(Box::new(move || callback(&outcome, true))),
        Delivery::Deferred => {
            host.keep_with_action(DeferredAction::new(move || callback(&outcome, false)))
        }
    }
}
