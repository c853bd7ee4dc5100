use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::entity::job_status::JobStatus;

/// Errors raised by job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Job not found: {context}")]
    NotFound { context: String },

    /// The requested status change is not an edge of the job state machine.
    #[error("Invalid job transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// A progress write targeted a job no live run owns.
    #[error("Job {id} is not in progress")]
    NotRunning { id: Uuid },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl StoreError {
    pub fn not_found_by_id(id: Uuid) -> Self {
        Self::NotFound {
            context: format!("id={}", id),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
