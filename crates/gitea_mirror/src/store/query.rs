use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::entity::job_status::JobStatus;
use crate::entity::mirror_job::{Column, Entity as MirrorJob, Model};

use super::errors::{Result, StoreError};

// ─── Query Operations ────────────────────────────────────────────────────────

/// Jobs of one batch run, oldest first.
pub async fn find_by_batch<C: ConnectionTrait>(db: &C, batch_id: Uuid) -> Result<Vec<Model>> {
    MirrorJob::find()
        .filter(Column::BatchId.eq(batch_id))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await
        .map_err(StoreError::from)
}

/// A user's most recent jobs, newest first.
pub async fn find_by_user<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    limit: u64,
) -> Result<Vec<Model>> {
    MirrorJob::find()
        .filter(Column::OwnerId.eq(owner_id))
        .order_by_desc(Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await
        .map_err(StoreError::from)
}

/// Most recent jobs across all users, newest first.
pub async fn find_recent<C: ConnectionTrait>(db: &C, limit: u64) -> Result<Vec<Model>> {
    MirrorJob::find()
        .order_by_desc(Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await
        .map_err(StoreError::from)
}

/// Jobs whose record claims a live run owns them.
pub async fn find_in_progress<C: ConnectionTrait>(db: &C) -> Result<Vec<Model>> {
    MirrorJob::find()
        .filter(Column::InProgress.eq(true))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await
        .map_err(StoreError::from)
}

/// Running jobs whose last checkpoint (or start) is older than `cutoff`.
pub async fn find_stalled<C: ConnectionTrait>(
    db: &C,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Model>> {
    let cutoff = cutoff.fixed_offset();
    MirrorJob::find()
        .filter(Column::InProgress.eq(true))
        .filter(
            Column::LastCheckpoint.lt(cutoff).or(Column::LastCheckpoint
                .is_null()
                .and(Column::StartedAt.lt(cutoff))),
        )
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await
        .map_err(StoreError::from)
}

pub async fn count_by_status<C: ConnectionTrait>(db: &C, status: JobStatus) -> Result<u64> {
    MirrorJob::find()
        .filter(Column::Status.eq(status))
        .count(db)
        .await
        .map_err(StoreError::from)
}
