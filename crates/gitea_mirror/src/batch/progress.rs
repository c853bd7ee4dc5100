//! Observer hooks for batch runs.
//!
//! Callbacks run on the orchestrator task (progress) or on the item task
//! (retries); they must be quick and must not block.

use std::sync::Arc;
use std::time::Duration;

use super::types::ItemOutcome;

/// Emitted once per finished item (success or exhausted failure).
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Items finished so far, including this one.
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    /// Outcome of the item that just finished.
    pub last: ItemOutcome,
}

/// Emitted before each retry wait of an item.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    pub item_id: String,
    pub item_name: String,
    pub error: String,
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub delay: Duration,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

pub type RetryCallback = Arc<dyn Fn(RetryNotice) + Send + Sync>;

#[inline]
pub fn emit_progress(on_progress: Option<&ProgressCallback>, update: ProgressUpdate) {
    if let Some(cb) = on_progress {
        cb(update);
    }
}

#[inline]
pub fn emit_retry(on_retry: Option<&RetryCallback>, notice: RetryNotice) {
    if let Some(cb) = on_retry {
        cb(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::batch::types::ItemStatus;

    #[test]
    fn emit_without_callback_is_a_no_op() {
        emit_retry(
            None,
            RetryNotice {
                item_id: "a".into(),
                item_name: "a".into(),
                error: "boom".into(),
                attempt: 1,
                delay: Duration::ZERO,
            },
        );
    }

    #[test]
    fn emit_progress_forwards_update() {
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_capture = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |update| {
            seen_capture
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(update.completed);
        });

        emit_progress(
            Some(&cb),
            ProgressUpdate {
                completed: 3,
                succeeded: 3,
                failed: 0,
                total: 10,
                last: ItemOutcome {
                    item_id: "x".into(),
                    item_name: "x".into(),
                    status: ItemStatus::Succeeded,
                    attempts: 1,
                    error: None,
                },
            },
        );

        assert_eq!(*seen.lock().unwrap_or_else(|e| e.into_inner()), vec![3]);
    }
}
