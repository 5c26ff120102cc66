use crate::CoreError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Asks the operator a yes/no question.
pub trait Prompt: Send + Sync {
    fn confirm(&self, message: &str, default: bool) -> bool;
}

/// Answers every question with its default.
pub struct Defaults;

impl Prompt for Defaults {
    fn confirm(&self, _message: &str, default: bool) -> bool {
        default
    }
}

/// Answers every question with a fixed value.
pub struct FixedAnswer(pub bool);

impl Prompt for FixedAnswer {
    fn confirm(&self, _message: &str, _default: bool) -> bool {
        self.0
    }
}

/// Execution context handed through every workflow: logging, operator
/// prompts, cancellation, and the warnings raised during the run.
pub struct Context {
    prompt: Box<dyn Prompt>,
    cancel: Arc<AtomicBool>,
    warnings: Mutex<Vec<String>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Box::new(Defaults))
    }
}

impl Context {
    pub fn new(prompt: Box<dyn Prompt>) -> Self {
        Self {
            prompt,
            cancel: Arc::new(AtomicBool::new(false)),
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Share `flag` as the cancellation flag, e.g. the one fed by
    /// [`crate::install_signal_handler`].
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn check_cancelled(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn log(&self, message: &str) {
        info!("{message}");
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    pub fn confirm(&self, message: &str, default: bool) -> bool {
        self.prompt.confirm(message, default)
    }

    /// Drain the warnings recorded so far.
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Install the fmt subscriber, filtered by `TRM_LOG` or `default_level`.
pub fn init_logging(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TRM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_collected_and_drained() {
        let ctx = Context::default();
        ctx.warn("first");
        ctx.warn(String::from("second"));
        assert_eq!(ctx.take_warnings(), vec!["first", "second"]);
        assert!(ctx.take_warnings().is_empty());
    }

    #[test]
    fn cancellation_is_shared() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = Context::default().with_cancel_flag(Arc::clone(&flag));
        assert!(ctx.check_cancelled().is_ok());
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(ctx.check_cancelled(), Err(CoreError::Cancelled)));
    }

    #[test]
    fn prompts_answer_deterministically() {
        assert!(Context::default().confirm("continue?", true));
        assert!(!Context::new(Box::new(FixedAnswer(false))).confirm("continue?", true));
    }

    #[test]
    fn init_logging_twice_is_harmless() {
        init_logging("debug");
        init_logging("info");
    }
}
