use gitea_mirror::batch::{ItemStatus, ProgressUpdate, RetryNotice};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle_progress(&self, update: ProgressUpdate) {
        let item = &update.last;
        match item.status {
            ItemStatus::Succeeded => {
                tracing::info!(
                    repo = %item.item_name,
                    attempts = item.attempts,
                    completed = update.completed,
                    total = update.total,
                    "Item succeeded"
                );
            }
            ItemStatus::Failed => {
                tracing::error!(
                    repo = %item.item_name,
                    attempts = item.attempts,
                    error = item.error.as_deref().unwrap_or("unknown error"),
                    completed = update.completed,
                    total = update.total,
                    "Item failed"
                );
            }
            ItemStatus::Skipped => {
                tracing::debug!(repo = %item.item_name, "Skipped");
            }
        }
    }

    pub fn handle_retry(&self, notice: RetryNotice) {
        tracing::warn!(
            repo = %notice.item_name,
            attempt = notice.attempt,
            retry_after_ms = notice.delay.as_millis() as u64,
            error = %notice.error,
            "Attempt failed, backing off"
        );
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
