//! Process-local [`JobStore`] backed by a mutex-guarded map.
//!
//! Applies the same transition guards as the SQL store. Useful for embedding
//! the engine without a database and for deterministic tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entity::job_status::JobStatus;
use crate::entity::mirror_job::Model;

use super::errors::{Result, StoreError};
use super::progress::{Checkpoint, Completion};
use super::single::NewJob;
use super::JobStore;

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Model>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing the pending-only creation path.
    pub fn insert_raw(&self, model: Model) {
        self.lock().insert(model.id, model);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Model>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn write_progress(job: &mut Model, checkpoint: &Checkpoint) {
    job.completed_items = checkpoint.completed_items();
    job.completed_item_ids = serde_json::Value::from(checkpoint.completed_item_ids.clone());
    job.last_checkpoint = Some(checkpoint.at.fixed_offset());
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<Model> {
        if job.owner_id.trim().is_empty() {
            return Err(StoreError::invalid_input("job owner must not be empty"));
        }
        let model = job.into_model(Uuid::new_v4(), Utc::now());
        self.lock().insert(model.id, model.clone());
        Ok(model)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn start(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found_by_id(id))?;
        if job.status != JobStatus::Pending {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::InProgress,
            });
        }
        job.status = JobStatus::InProgress;
        job.in_progress = true;
        job.started_at = Some(at.fixed_offset());
        Ok(())
    }

    async fn checkpoint(&self, id: Uuid, checkpoint: &Checkpoint) -> Result<()> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found_by_id(id))?;
        if !job.in_progress {
            return Err(StoreError::NotRunning { id });
        }
        write_progress(job, checkpoint);
        Ok(())
    }

    async fn finish(&self, id: Uuid, completion: &Completion) -> Result<()> {
        if !completion.status.is_terminal() {
            return Err(StoreError::invalid_input(format!(
                "{} is not a terminal status",
                completion.status
            )));
        }
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found_by_id(id))?;
        if job.status != JobStatus::InProgress {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: completion.status,
            });
        }
        if !job.in_progress {
            return Err(StoreError::NotRunning { id });
        }
        write_progress(job, &completion.checkpoint);
        job.status = completion.status;
        job.in_progress = false;
        job.message = completion.message.clone();
        job.details = completion.details.clone();
        job.completed_at = Some(completion.checkpoint.at.fixed_offset());
        Ok(())
    }

    async fn fail_orphan(&self, id: Uuid, message: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.in_progress || job.status == JobStatus::Pending => {
                job.status = JobStatus::Failed;
                job.in_progress = false;
                job.message = message.to_string();
                job.completed_at = Some(at.fixed_offset());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_in_progress(&self) -> Result<Vec<Model>> {
        let mut running: Vec<Model> = self
            .lock()
            .values()
            .filter(|job| job.in_progress)
            .cloned()
            .collect();
        running.sort_by_key(|job| job.created_at);
        Ok(running)
    }

    async fn find_by_batch(&self, batch_id: Uuid) -> Result<Vec<Model>> {
        let mut jobs: Vec<Model> = self
            .lock()
            .values()
            .filter(|job| job.batch_id == Some(batch_id))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn find_by_user(&self, owner_id: &str, limit: u64) -> Result<Vec<Model>> {
        let mut jobs: Vec<Model> = self
            .lock()
            .values()
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.created_at));
        jobs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(jobs)
    }
}
