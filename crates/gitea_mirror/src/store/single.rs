use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use uuid::Uuid;

use crate::entity::job_status::JobStatus;
use crate::entity::job_type::JobType;
use crate::entity::mirror_job::{ActiveModel, Entity as MirrorJob, Model};
use crate::entity::target_kind::TargetRef;

use super::errors::{Result, StoreError};

/// Parameters for enrolling a new batch as a pending job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub owner_id: String,
    pub job_type: JobType,
    pub batch_id: Option<Uuid>,
    pub target: Option<TargetRef>,
    pub item_ids: Vec<String>,
    pub message: String,
}

impl NewJob {
    pub fn new(owner_id: impl Into<String>, job_type: JobType, item_ids: Vec<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            job_type,
            batch_id: None,
            target: None,
            item_ids,
            message: String::new(),
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
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Build the pending record. Item ids are stored as given, duplicates
    /// included.
    pub(crate) fn into_model(self, id: Uuid, now: DateTime<Utc>) -> Model {
        let item_ids = self.item_ids;
        let (target_kind, target_id, target_name) = match &self.target {
            Some(target) => (
                Some(target.kind()),
                Some(target.id().to_string()),
                Some(target.name().to_string()),
            ),
            None => (None, None, None),
        };

        Model {
            id,
            owner_id: self.owner_id,
            job_type: self.job_type,
            batch_id: self.batch_id,
            target_kind,
            target_id,
            target_name,
            status: JobStatus::Pending,
            in_progress: false,
            message: self.message,
            details: None,
            total_items: item_ids.len() as i32,
            completed_items: 0,
            item_ids: serde_json::Value::from(item_ids),
            completed_item_ids: serde_json::Value::Array(Vec::new()),
            created_at: now.fixed_offset(),
            started_at: None,
            completed_at: None,
            last_checkpoint: None,
        }
    }
}

fn insertable(model: Model) -> ActiveModel {
    ActiveModel {
        id: Set(model.id),
        owner_id: Set(model.owner_id),
        job_type: Set(model.job_type),
        batch_id: Set(model.batch_id),
        target_kind: Set(model.target_kind),
        target_id: Set(model.target_id),
        target_name: Set(model.target_name),
        status: Set(model.status),
        in_progress: Set(model.in_progress),
        message: Set(model.message),
        details: Set(model.details),
        total_items: Set(model.total_items),
        completed_items: Set(model.completed_items),
        item_ids: Set(model.item_ids),
        completed_item_ids: Set(model.completed_item_ids),
        created_at: Set(model.created_at),
        started_at: Set(model.started_at),
        completed_at: Set(model.completed_at),
        last_checkpoint: Set(model.last_checkpoint),
    }
}

// ─── Single Record Operations ────────────────────────────────────────────────

/// Insert a new pending job.
///
/// # Errors
/// Returns `StoreError::InvalidInput` for a blank owner and
/// `StoreError::Database` if the insert fails.
pub async fn insert_job<C: ConnectionTrait>(db: &C, job: NewJob) -> Result<Model> {
    if job.owner_id.trim().is_empty() {
        return Err(StoreError::invalid_input("job owner must not be empty"));
    }
    let model = job.into_model(Uuid::new_v4(), Utc::now());
    insertable(model)
        .insert(db)
        .await
        .map_err(StoreError::from)
}

pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Model>> {
    MirrorJob::find_by_id(id)
        .one(db)
        .await
        .map_err(StoreError::from)
}

/// Like [`find_by_id`], but a missing row is an error.
pub async fn get_job<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Model> {
    find_by_id(db, id)
        .await?
        .ok_or_else(|| StoreError::not_found_by_id(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_model_starts_pending_with_items_as_given() {
        let job = NewJob::new(
            "user-1",
            JobType::Mirror,
            vec!["a".into(), "b".into(), "a".into()],
        )
        .with_target(TargetRef::organization("3", "acme"))
        .with_message("queued");
        let model = job.into_model(Uuid::new_v4(), Utc::now());

        assert_eq!(model.status, JobStatus::Pending);
        assert!(!model.in_progress);
        assert_eq!(model.total_items, 3);
        assert_eq!(model.item_ids(), vec!["a", "b", "a"]);
        assert!(model.completed_item_ids().is_empty());
        assert_eq!(model.target(), Some(TargetRef::organization("3", "acme")));
        assert_eq!(model.message, "queued");
    }
}
