use thiserror::Error;

use crate::store::StoreError;

/// Errors that abort a batch before or after item processing.
///
/// Item failures never surface here; they are part of the
/// [`BatchOutcome`](super::BatchOutcome).
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch has no items")]
    EmptyBatch,

    #[error("Invalid batch configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Batch task failed: {message}")]
    TaskFailed { message: String },
}

impl BatchError {
    #[inline]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
