//! Initial migration: mirror job records and the per-user event log.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_mirror_jobs(manager).await?;
        self.create_events(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Events::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MirrorJobs::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_mirror_jobs(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MirrorJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MirrorJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    // Ownership
                    .col(ColumnDef::new(MirrorJobs::OwnerId).string().not_null())
                    .col(ColumnDef::new(MirrorJobs::JobType).string().not_null())
                    .col(ColumnDef::new(MirrorJobs::BatchId).uuid().null())
                    // Target
                    .col(ColumnDef::new(MirrorJobs::TargetKind).string().null())
                    .col(ColumnDef::new(MirrorJobs::TargetId).string().null())
                    .col(ColumnDef::new(MirrorJobs::TargetName).string().null())
                    // Lifecycle
                    .col(
                        ColumnDef::new(MirrorJobs::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(MirrorJobs::InProgress)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(MirrorJobs::Message)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(MirrorJobs::Details).json().null())
                    // Progress
                    .col(
                        ColumnDef::new(MirrorJobs::TotalItems)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MirrorJobs::CompletedItems)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MirrorJobs::ItemIds)
                            .json()
                            .not_null()
                            .default(Expr::cust("'[]'")),
                    )
                    .col(
                        ColumnDef::new(MirrorJobs::CompletedItemIds)
                            .json()
                            .not_null()
                            .default(Expr::cust("'[]'")),
                    )
                    // Timestamps
                    .col(
                        ColumnDef::new(MirrorJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MirrorJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MirrorJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MirrorJobs::LastCheckpoint)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mirror_jobs_owner")
                    .table(MirrorJobs::Table)
                    .col(MirrorJobs::OwnerId)
                    .col(MirrorJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mirror_jobs_batch")
                    .table(MirrorJobs::Table)
                    .col(MirrorJobs::BatchId)
                    .to_owned(),
            )
            .await?;

        // Startup recovery scans for rows still flagged as running
        manager
            .create_index(
                Index::create()
                    .name("idx_mirror_jobs_in_progress")
                    .table(MirrorJobs::Table)
                    .col(MirrorJobs::InProgress)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_events(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Events::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Events::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Events::UserId).string().not_null())
                    .col(ColumnDef::new(Events::Channel).string().not_null())
                    .col(
                        ColumnDef::new(Events::Payload)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(
                        ColumnDef::new(Events::Read)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Events::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_user_channel_id")
                    .table(Events::Table)
                    .col(Events::UserId)
                    .col(Events::Channel)
                    .col(Events::Id)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum MirrorJobs {
    Table,
    Id,
    OwnerId,
    JobType,
    BatchId,
    TargetKind,
    TargetId,
    TargetName,
    Status,
    InProgress,
    Message,
    Details,
    TotalItems,
    CompletedItems,
    ItemIds,
    CompletedItemIds,
    CreatedAt,
    StartedAt,
    CompletedAt,
    LastCheckpoint,
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
    UserId,
    Channel,
    Payload,
    Read,
    CreatedAt,
}
