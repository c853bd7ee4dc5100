use gitea_mirror::batch::{ItemStatus, ProgressUpdate, RetryNotice};
use indicatif::{ProgressBar, ProgressStyle};

/// Interactive progress reporter using indicatif.
///
/// One bar for the batch; failures and retries are printed above it so they
/// stay visible after the bar finishes.
pub struct InteractiveReporter {
    bar: ProgressBar,
}

impl InteractiveReporter {
    pub fn new(label: &str, total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_prefix(label.to_string());
        Self::with_bar(bar)
    }

    pub fn with_bar(bar: ProgressBar) -> Self {
        bar.set_style(Self::bar_style());
        Self { bar }
    }

    pub fn handle_progress(&self, update: ProgressUpdate) {
        self.bar.set_length(update.total as u64);
        self.bar.set_position(update.completed as u64);
        self.bar
            .set_message(format!("{} ok, {} failed", update.succeeded, update.failed));

        if update.last.status == ItemStatus::Failed {
            self.bar.println(format!(
                "{} {} ({} attempts): {}",
                console::style("✗").red().bold(),
                update.last.item_name,
                update.last.attempts,
                update.last.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    pub fn handle_retry(&self, notice: RetryNotice) {
        self.bar.println(format!(
            "{} {}: {} (attempt {}, retrying in {:.1}s)",
            console::style("↻").yellow(),
            notice.item_name,
            notice.error,
            notice.attempt,
            notice.delay.as_secs_f64()
        ));
    }

    pub fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish();
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn message(&self) -> String {
        self.bar.message()
    }

    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>3}/{len:3} {msg}")
            .expect("Invalid template")
            .progress_chars("█▓░")
    }
}
