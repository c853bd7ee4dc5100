//! Persistence for mirror job records.
//!
//! [`JobStore`] is the seam the batch engine writes through. [`SqlJobStore`]
//! is the SeaORM-backed implementation; [`MemoryJobStore`] keeps records in
//! process memory. The free functions operate on any connection, including
//! transactions.

mod cleanup;
mod errors;
mod memory;
mod progress;
mod query;
mod single;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::entity::mirror_job::Model;

pub use cleanup::{FORCE_COMPLETED_MESSAGE, PurgeReport, purge_user_history};
pub use errors::{Result, StoreError};
pub use memory::MemoryJobStore;
pub use progress::{Checkpoint, Completion, fail_orphan, finish_job, mark_started, write_checkpoint};
pub use query::{
    count_by_status, find_by_batch, find_by_user, find_in_progress, find_recent, find_stalled,
};
pub use single::{NewJob, find_by_id, get_job, insert_job};

/// Durable storage for job records.
///
/// Implementations must apply every write atomically and refuse writes that
/// would move a job backwards through its state machine.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `pending` job record.
    async fn create(&self, job: NewJob) -> Result<Model>;

    async fn get(&self, id: Uuid) -> Result<Option<Model>>;

    /// `pending -> in_progress`, setting `in_progress = true`.
    async fn start(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Intermediate checkpoint for a running job.
    async fn checkpoint(&self, id: Uuid, checkpoint: &Checkpoint) -> Result<()>;

    /// Final checkpoint and terminal status, written together.
    async fn finish(&self, id: Uuid, completion: &Completion) -> Result<()>;

    /// Fail a job left behind without an owner, running or never started.
    async fn fail_orphan(&self, id: Uuid, message: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn find_in_progress(&self) -> Result<Vec<Model>>;

    async fn find_by_batch(&self, batch_id: Uuid) -> Result<Vec<Model>>;

    async fn find_by_user(&self, owner_id: &str, limit: u64) -> Result<Vec<Model>>;
}

/// [`JobStore`] over a SeaORM connection.
#[derive(Debug, Clone)]
pub struct SqlJobStore {
    db: Arc<DatabaseConnection>,
}

impl SqlJobStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl JobStore for SqlJobStore {
    async fn create(&self, job: NewJob) -> Result<Model> {
        insert_job(self.db.as_ref(), job).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Model>> {
        find_by_id(self.db.as_ref(), id).await
    }

    async fn start(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        mark_started(self.db.as_ref(), id, at).await
    }

    async fn checkpoint(&self, id: Uuid, checkpoint: &Checkpoint) -> Result<()> {
        write_checkpoint(self.db.as_ref(), id, checkpoint).await
    }

    async fn finish(&self, id: Uuid, completion: &Completion) -> Result<()> {
        finish_job(self.db.as_ref(), id, completion).await
    }

    async fn fail_orphan(&self, id: Uuid, message: &str, at: DateTime<Utc>) -> Result<bool> {
        fail_orphan(self.db.as_ref(), id, message, at).await
    }

    async fn find_in_progress(&self) -> Result<Vec<Model>> {
        find_in_progress(self.db.as_ref()).await
    }

    async fn find_by_batch(&self, batch_id: Uuid) -> Result<Vec<Model>> {
        find_by_batch(self.db.as_ref(), batch_id).await
    }

    async fn find_by_user(&self, owner_id: &str, limit: u64) -> Result<Vec<Model>> {
        find_by_user(self.db.as_ref(), owner_id, limit).await
    }
}
