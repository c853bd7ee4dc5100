//! Batch orchestration: bounded fan-out with retries, checkpoints and
//! orphan recovery.

mod checkpoint;
mod engine;
mod errors;
mod limiter;
mod progress;
mod recovery;
mod types;

pub use checkpoint::Checkpointer;
pub use engine::{BatchEngine, BatchTicket, START_FAILED_MESSAGE};
pub use errors::BatchError;
pub use limiter::ConcurrencyLimiter;
pub use progress::{
    ProgressCallback, ProgressUpdate, RetryCallback, RetryNotice, emit_progress, emit_retry,
};
pub use recovery::{
    ActiveJobGuard, ActiveJobs, ORPHANED_JOB_MESSAGE, RecoveredJob, recover_orphaned_jobs,
    recover_stale_jobs, retry_items,
};
pub use types::{
    BatchConfig, BatchOutcome, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CONCURRENCY_LIMIT,
    ItemOutcome, ItemStatus, RetryPredicate,
};
