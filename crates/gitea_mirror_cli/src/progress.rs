//! Progress reporting for batch runs.
//!
//! This module provides two modes of progress reporting:
//! - Interactive mode (TTY): an animated progress bar using indicatif
//! - Logging mode (non-TTY): structured logging using tracing

mod interactive;
mod logging;

use std::sync::Arc;

use console::Term;
use gitea_mirror::batch::{ProgressCallback, ProgressUpdate, RetryCallback, RetryNotice};

pub use interactive::InteractiveReporter;
pub use logging::LoggingReporter;

/// Progress reporter that handles both interactive and logging modes.
pub enum ProgressReporter {
    /// Interactive progress bar for TTY.
    Interactive(InteractiveReporter),
    /// Structured logging for non-TTY (CI, pipes).
    Logging(LoggingReporter),
}

impl ProgressReporter {
    /// Create a reporter for a batch of `total` items, auto-detecting TTY mode.
    pub fn new(label: &str, total: usize) -> Self {
        if Term::stdout().is_term() {
            Self::Interactive(InteractiveReporter::new(label, total))
        } else {
            Self::Logging(LoggingReporter::new())
        }
    }

    pub fn handle_progress(&self, update: ProgressUpdate) {
        match self {
            Self::Interactive(r) => r.handle_progress(update),
            Self::Logging(r) => r.handle_progress(update),
        }
    }

    pub fn handle_retry(&self, notice: RetryNotice) {
        match self {
            Self::Interactive(r) => r.handle_retry(notice),
            Self::Logging(r) => r.handle_retry(notice),
        }
    }

    /// Convert to the engine's progress hook.
    pub fn progress_callback(self: &Arc<Self>) -> ProgressCallback {
        let reporter = Arc::clone(self);
        Arc::new(move |update| reporter.handle_progress(update))
    }

    /// Convert to the engine's retry hook.
    pub fn retry_callback(self: &Arc<Self>) -> RetryCallback {
        let reporter = Arc::clone(self);
        Arc::new(move |notice| reporter.handle_retry(notice))
    }

    /// Finish the progress bar (interactive mode only).
    pub fn finish(&self) {
        if let Self::Interactive(r) = self {
            r.finish();
        }
    }
}
