//! Status transitions and checkpoint writes for running jobs.
//!
//! Every write here is a single `UPDATE` guarded by the expected current
//! state, so a stale writer can never move a job backwards.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entity::job_status::JobStatus;
use crate::entity::mirror_job::{Column, Entity as MirrorJob};

use super::errors::{Result, StoreError};
use super::single::find_by_id;

/// Snapshot of completed work, written atomically with its count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub completed_item_ids: Vec<String>,
    pub at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn completed_items(&self) -> i32 {
        self.completed_item_ids.len() as i32
    }

    fn ids_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.completed_item_ids.clone())
    }
}

/// Terminal write for a job: final checkpoint plus outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub status: JobStatus,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub checkpoint: Checkpoint,
}

/// Explain why a guarded update touched no rows.
async fn rejected<C: ConnectionTrait>(db: &C, id: Uuid, to: JobStatus) -> StoreError {
    match find_by_id(db, id).await {
        Ok(Some(job)) if job.status.can_transition_to(to) => StoreError::NotRunning { id },
        Ok(Some(job)) => StoreError::InvalidTransition {
            id,
            from: job.status,
            to,
        },
        Ok(None) => StoreError::not_found_by_id(id),
        Err(err) => err,
    }
}

/// Move a pending job to `in_progress` and claim it for the current run.
pub async fn mark_started<C: ConnectionTrait>(db: &C, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    let result = MirrorJob::update_many()
        .col_expr(Column::Status, Expr::value(JobStatus::InProgress))
        .col_expr(Column::InProgress, Expr::value(true))
        .col_expr(Column::StartedAt, Expr::value(at.fixed_offset()))
        .filter(Column::Id.eq(id))
        .filter(Column::Status.eq(JobStatus::Pending))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(rejected(db, id, JobStatus::InProgress).await);
    }
    Ok(())
}

/// Persist an intermediate checkpoint.
///
/// Count, id list and timestamp land in one statement, and only while the
/// job is still owned by a live run.
pub async fn write_checkpoint<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    checkpoint: &Checkpoint,
) -> Result<()> {
    let result = MirrorJob::update_many()
        .col_expr(
            Column::CompletedItems,
            Expr::value(checkpoint.completed_items()),
        )
        .col_expr(Column::CompletedItemIds, Expr::value(checkpoint.ids_json()))
        .col_expr(
            Column::LastCheckpoint,
            Expr::value(checkpoint.at.fixed_offset()),
        )
        .filter(Column::Id.eq(id))
        .filter(Column::InProgress.eq(true))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(match find_by_id(db, id).await? {
            Some(_) => StoreError::NotRunning { id },
            None => StoreError::not_found_by_id(id),
        });
    }
    Ok(())
}

/// Write the final checkpoint and terminal status in one statement.
pub async fn finish_job<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    completion: &Completion,
) -> Result<()> {
    if !completion.status.is_terminal() {
        return Err(StoreError::invalid_input(format!(
            "{} is not a terminal status",
            completion.status
        )));
    }

    let at = completion.checkpoint.at.fixed_offset();
    let result = MirrorJob::update_many()
        .col_expr(Column::Status, Expr::value(completion.status))
        .col_expr(Column::InProgress, Expr::value(false))
        .col_expr(Column::Message, Expr::value(completion.message.clone()))
        .col_expr(Column::Details, Expr::value(completion.details.clone()))
        .col_expr(
            Column::CompletedItems,
            Expr::value(completion.checkpoint.completed_items()),
        )
        .col_expr(
            Column::CompletedItemIds,
            Expr::value(completion.checkpoint.ids_json()),
        )
        .col_expr(Column::LastCheckpoint, Expr::value(at))
        .col_expr(Column::CompletedAt, Expr::value(at))
        .filter(Column::Id.eq(id))
        .filter(Column::Status.eq(JobStatus::InProgress))
        .filter(Column::InProgress.eq(true))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(rejected(db, id, completion.status).await);
    }
    Ok(())
}

/// Fail a job that has no live owner: one still flagged as running, or one
/// that was created but never started.
///
/// Returns `false` when the job had already reached a terminal status.
pub async fn fail_orphan<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    message: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = MirrorJob::update_many()
        .col_expr(Column::Status, Expr::value(JobStatus::Failed))
        .col_expr(Column::InProgress, Expr::value(false))
        .col_expr(Column::Message, Expr::value(message.to_string()))
        .col_expr(Column::CompletedAt, Expr::value(at.fixed_offset()))
        .filter(Column::Id.eq(id))
        .filter(
            Column::InProgress
                .eq(true)
                .or(Column::Status.eq(JobStatus::Pending)),
        )
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn affected(rows: u64) -> MockExecResult {
        MockExecResult {
            rows_affected: rows,
            last_insert_id: 0,
        }
    }

    #[test]
    fn checkpoint_count_matches_ids() {
        let cp = Checkpoint {
            completed_item_ids: vec!["a".into(), "b".into()],
            at: Utc::now(),
        };
        assert_eq!(cp.completed_items(), 2);
        assert_eq!(cp.ids_json(), serde_json::json!(["a", "b"]));
    }

    #[tokio::test]
    async fn checkpoint_is_a_single_update() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([affected(1)])
            .into_connection();
        let cp = Checkpoint {
            completed_item_ids: vec!["a".into()],
            at: Utc::now(),
        };

        write_checkpoint(&db, Uuid::new_v4(), &cp)
            .await
            .expect("guarded update should succeed");

        let log = db.into_transaction_log();
        assert_eq!(log.len(), 1, "checkpoint must not split into several writes");
    }

    #[tokio::test]
    async fn finish_rejects_non_terminal_status() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let completion = Completion {
            status: JobStatus::InProgress,
            message: String::new(),
            details: None,
            checkpoint: Checkpoint {
                completed_item_ids: vec![],
                at: Utc::now(),
            },
        };
        let err = finish_job(&db, Uuid::new_v4(), &completion)
            .await
            .expect_err("non-terminal status should be rejected");
        assert!(matches!(err, StoreError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn fail_orphan_reports_whether_a_row_changed() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([affected(1), affected(0)])
            .into_connection();
        let id = Uuid::new_v4();

        assert!(fail_orphan(&db, id, "gone", Utc::now()).await.unwrap());
        assert!(!fail_orphan(&db, id, "gone", Utc::now()).await.unwrap());
    }
}
