//! Batch configuration and outcome types.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::job_status::JobStatus;
use crate::entity::job_type::JobType;
use crate::entity::target_kind::TargetRef;
use crate::item::ItemError;
use crate::retry::{Backoff, RetryPolicy};

use super::errors::BatchError;
use super::progress::{ProgressCallback, RetryCallback};
use super::recovery::ActiveJobs;

/// Default number of item operations running at once.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;

/// Default number of successful items between checkpoint writes.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 5;

/// Decides whether a failed attempt is worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&ItemError) -> bool + Send + Sync>;

/// Per-item result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    /// Every attempt failed.
    Failed,
    /// Never dispatched because the batch was cancelled.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub item_name: String,
    pub status: ItemStatus,
    pub attempts: u32,
    /// Last error, for failed items.
    pub error: Option<String>,
}

impl ItemOutcome {
    pub(crate) fn skipped(item_id: String, item_name: String) -> Self {
        Self {
            item_id,
            item_name,
            status: ItemStatus::Skipped,
            attempts: 0,
            error: None,
        }
    }
}

/// Summary of a finished batch run.
#[derive(Debug, Clone)]
#[must_use]
pub struct BatchOutcome {
    pub job_id: Uuid,
    pub batch_id: Uuid,
    /// Terminal status written to the job record.
    pub status: JobStatus,
    pub message: String,
    /// One entry per submitted item, in submission order.
    pub outcomes: Vec<ItemOutcome>,
    /// Enrolled ids without a successful completion.
    pub remaining_item_ids: Vec<String>,
    pub cancelled: bool,
}

impl BatchOutcome {
    fn count(&self, status: ItemStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(ItemStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(ItemStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(ItemStatus::Skipped)
    }

    pub fn is_success(&self) -> bool {
        self.status != JobStatus::Failed
    }
}

/// Everything a batch run needs besides its items and operation.
#[derive(Clone)]
pub struct BatchConfig {
    pub user_id: String,
    pub job_type: JobType,
    /// Generated when absent.
    pub batch_id: Option<Uuid>,
    pub target: Option<TargetRef>,
    pub concurrency_limit: usize,
    pub retry: RetryPolicy,
    pub checkpoint_interval: usize,
    pub on_progress: Option<ProgressCallback>,
    pub on_retry: Option<RetryCallback>,
    /// Defaults to retrying every error.
    pub retry_if: Option<RetryPredicate>,
    /// Set to stop dispatching new items.
    pub cancel: Option<Arc<AtomicBool>>,
    pub active_jobs: Option<ActiveJobs>,
}

impl std::fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchConfig")
            .field("user_id", &self.user_id)
            .field("job_type", &self.job_type)
            .field("batch_id", &self.batch_id)
            .field("target", &self.target)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("retry", &self.retry)
            .field("checkpoint_interval", &self.checkpoint_interval)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("retry_if", &self.retry_if.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl BatchConfig {
    pub fn new(user_id: impl Into<String>, job_type: JobType) -> Self {
        Self {
            user_id: user_id.into(),
            job_type,
            batch_id: None,
            target: None,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            retry: RetryPolicy::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            on_progress: None,
            on_retry: None,
            retry_if: None,
            cancel: None,
            active_jobs: None,
        }
    }

    #[must_use]
    pub fn with_batch_id(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.retry.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    #[must_use]
    pub fn with_retry_callback(mut self, on_retry: RetryCallback) -> Self {
        self.on_retry = Some(on_retry);
        self
    }

    #[must_use]
    pub fn with_retry_if(mut self, retry_if: RetryPredicate) -> Self {
        self.retry_if = Some(retry_if);
        self
    }

    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn with_active_jobs(mut self, active_jobs: ActiveJobs) -> Self {
        self.active_jobs = Some(active_jobs);
        self
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.user_id.trim().is_empty() {
            return Err(BatchError::invalid_config("user_id must not be empty"));
        }
        if self.concurrency_limit == 0 {
            return Err(BatchError::invalid_config(
                "concurrency_limit must be at least 1",
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(BatchError::invalid_config(
                "checkpoint_interval must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

}

/// Errors are retried unless a predicate says otherwise.
pub(crate) fn should_retry(retry_if: Option<&RetryPredicate>, err: &ItemError) -> bool {
    retry_if.is_none_or(|pred| pred(err))
}
