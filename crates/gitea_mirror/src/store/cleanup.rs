//! Bulk removal of a user's job and event history.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};
use tracing::info;

use crate::entity::event::{Column as EventColumn, Entity as Event};
use crate::entity::job_status::JobStatus;
use crate::entity::mirror_job::{Column, Entity as MirrorJob};

use super::errors::Result;

pub const FORCE_COMPLETED_MESSAGE: &str = "Force-completed before history cleanup";

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Jobs that were still flagged as running and got failed first.
    pub force_completed: u64,
    pub jobs_deleted: u64,
    pub events_deleted: u64,
}

/// Delete every job and event of `owner_id` in one transaction.
///
/// Running jobs are first moved to `failed` so no reader ever observes a
/// deleted-while-running record. Either everything goes or nothing does.
pub async fn purge_user_history(db: &DatabaseConnection, owner_id: &str) -> Result<PurgeReport> {
    let txn = db.begin().await?;
    let now = Utc::now().fixed_offset();

    let forced = MirrorJob::update_many()
        .col_expr(Column::Status, Expr::value(JobStatus::Failed))
        .col_expr(Column::InProgress, Expr::value(false))
        .col_expr(Column::Message, Expr::value(FORCE_COMPLETED_MESSAGE))
        .col_expr(Column::CompletedAt, Expr::value(now))
        .filter(Column::OwnerId.eq(owner_id))
        .filter(Column::InProgress.eq(true))
        .exec(&txn)
        .await?;

    let jobs = MirrorJob::delete_many()
        .filter(Column::OwnerId.eq(owner_id))
        .exec(&txn)
        .await?;

    let events = Event::delete_many()
        .filter(EventColumn::UserId.eq(owner_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    let report = PurgeReport {
        force_completed: forced.rows_affected,
        jobs_deleted: jobs.rows_affected,
        events_deleted: events.rows_affected,
    };
    info!(
        owner_id,
        force_completed = report.force_completed,
        jobs_deleted = report.jobs_deleted,
        events_deleted = report.events_deleted,
        "Purged user history"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn purge_reports_rows_from_each_statement() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([
                MockExecResult {
                    rows_affected: 1,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 4,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 9,
                    last_insert_id: 0,
                },
            ])
            .into_connection();

        let report = purge_user_history(&db, "user-1")
            .await
            .expect("purge should succeed");

        assert_eq!(
            report,
            PurgeReport {
                force_completed: 1,
                jobs_deleted: 4,
                events_deleted: 9,
            }
        );
    }
}
