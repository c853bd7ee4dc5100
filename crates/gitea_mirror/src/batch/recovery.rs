//! Startup recovery of jobs abandoned by a dead process.
//!
//! A job with `in_progress = true` that no live orchestrator has registered
//! can only be left over from a crash or restart. Such jobs are failed with
//! a fixed message; their unfinished items are reported so the caller can
//! start a `retry` batch for them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::entity::mirror_job::Model as JobModel;
use crate::item::MirrorItem;
use crate::store::{JobStore, StoreError};

pub const ORPHANED_JOB_MESSAGE: &str =
    "Job interrupted: the process stopped before the batch finished";

/// Jobs currently owned by an orchestrator in this process.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `job_id` as live until the guard drops.
    #[must_use = "the job is unregistered when the guard drops"]
    pub fn register(&self, job_id: Uuid) -> ActiveJobGuard {
        self.lock().insert(job_id);
        ActiveJobGuard {
            jobs: self.clone(),
            job_id,
        }
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.lock().contains(&job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug)]
pub struct ActiveJobGuard {
    jobs: ActiveJobs,
    job_id: Uuid,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.job_id);
    }
}

/// A job failed by recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredJob {
    pub job_id: Uuid,
    pub owner_id: String,
    pub batch_id: Option<Uuid>,
    pub completed_items: i32,
    pub total_items: i32,
    /// Ids to resubmit, in enrollment order.
    pub remaining_item_ids: Vec<String>,
}

impl RecoveredJob {
    fn from_model(job: &JobModel) -> Self {
        Self {
            job_id: job.id,
            owner_id: job.owner_id.clone(),
            batch_id: job.batch_id,
            completed_items: job.completed_items,
            total_items: job.total_items,
            remaining_item_ids: job.remaining_item_ids(),
        }
    }
}

/// Fail every running job not owned by this process.
///
/// Only correct when no other process runs batches against the same store;
/// a live job of another process looks exactly like an orphan here. Prefer
/// [`recover_stale_jobs`] when that cannot be ruled out.
///
/// Safe to call repeatedly; a job already failed is skipped.
pub async fn recover_orphaned_jobs(
    store: &dyn JobStore,
    active: &ActiveJobs,
) -> Result<Vec<RecoveredJob>, StoreError> {
    recover_where(store, active, |_| true).await
}

/// Fail running jobs not owned by this process that have shown no sign of
/// life since `cutoff`.
///
/// A job's last sign of life is its latest checkpoint, or its start time
/// before the first checkpoint. Jobs another process is still driving keep
/// checkpointing and are left alone.
pub async fn recover_stale_jobs(
    store: &dyn JobStore,
    active: &ActiveJobs,
    cutoff: DateTime<Utc>,
) -> Result<Vec<RecoveredJob>, StoreError> {
    recover_where(store, active, |job| last_seen(job) < cutoff).await
}

fn last_seen(job: &JobModel) -> DateTime<Utc> {
    job.last_checkpoint
        .or(job.started_at)
        .unwrap_or(job.created_at)
        .with_timezone(&Utc)
}

async fn recover_where(
    store: &dyn JobStore,
    active: &ActiveJobs,
    is_orphan: impl Fn(&JobModel) -> bool,
) -> Result<Vec<RecoveredJob>, StoreError> {
    let running = store.find_in_progress().await?;
    let mut recovered = Vec::new();

    for job in running {
        if active.contains(job.id) || !is_orphan(&job) {
            continue;
        }
        let report = RecoveredJob::from_model(&job);
        match store
            .fail_orphan(job.id, ORPHANED_JOB_MESSAGE, Utc::now())
            .await
        {
            Ok(true) => {
                warn!(
                    job_id = %job.id,
                    owner_id = %job.owner_id,
                    completed = job.completed_items,
                    total = job.total_items,
                    remaining = report.remaining_item_ids.len(),
                    "Recovered orphaned job"
                );
                recovered.push(report);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to recover orphaned job");
            }
        }
    }

    if !recovered.is_empty() {
        info!(count = recovered.len(), "Orphan recovery finished");
    }
    Ok(recovered)
}

/// Keep only the items `job` did not complete, in the caller's order.
pub fn retry_items<I: MirrorItem>(job: &JobModel, items: Vec<I>) -> Vec<I> {
    let remaining: HashSet<String> = job.remaining_item_ids().into_iter().collect();
    items
        .into_iter()
        .filter(|item| remaining.contains(&item.item_id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::job_status::JobStatus;
    use crate::entity::job_type::JobType;
    use crate::item::RepositoryRef;
    use crate::store::{Checkpoint, MemoryJobStore, NewJob};

    fn repos(names: &[&str]) -> Vec<RepositoryRef> {
        names.iter().map(|n| RepositoryRef::new("acme", *n)).collect()
    }

    fn ids(repos: &[RepositoryRef]) -> Vec<String> {
        repos.iter().map(MirrorItem::item_id).collect()
    }

    #[test]
    fn guard_unregisters_on_drop() {
        let active = ActiveJobs::new();
        let id = Uuid::new_v4();
        {
            let _guard = active.register(id);
            assert!(active.contains(id));
        }
        assert!(!active.contains(id));
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn orphaned_jobs_are_failed_and_live_ones_kept() {
        let store = MemoryJobStore::new();
        let items = repos(&["a", "b", "c"]);

        let orphan = store
            .create(NewJob::new("u", JobType::Mirror, ids(&items)))
            .await
            .unwrap();
        store.start(orphan.id, Utc::now()).await.unwrap();
        store
            .checkpoint(
                orphan.id,
                &Checkpoint {
                    completed_item_ids: vec!["acme/b".into()],
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let live = store
            .create(NewJob::new("u", JobType::Mirror, ids(&items)))
            .await
            .unwrap();
        store.start(live.id, Utc::now()).await.unwrap();

        let active = ActiveJobs::new();
        let _guard = active.register(live.id);

        let recovered = recover_orphaned_jobs(&store, &active).await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].job_id, orphan.id);
        assert_eq!(recovered[0].remaining_item_ids, vec!["acme/a", "acme/c"]);

        let failed = store.get(orphan.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(!failed.in_progress);
        assert_eq!(failed.message, ORPHANED_JOB_MESSAGE);
        assert_eq!(failed.completed_items, 1);

        let untouched = store.get(live.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::InProgress);

        // Second pass finds nothing new.
        assert!(recover_orphaned_jobs(&store, &active).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_recovery_skips_jobs_that_checkpointed_recently() {
        let store = MemoryJobStore::new();
        let items = repos(&["a", "b"]);
        let long_ago = Utc::now() - chrono::Duration::hours(2);

        let quiet = store
            .create(NewJob::new("u", JobType::Mirror, ids(&items)))
            .await
            .unwrap();
        store.start(quiet.id, long_ago).await.unwrap();

        let busy = store
            .create(NewJob::new("u", JobType::Mirror, ids(&items)))
            .await
            .unwrap();
        store.start(busy.id, long_ago).await.unwrap();
        store
            .checkpoint(
                busy.id,
                &Checkpoint {
                    completed_item_ids: vec!["acme/a".into()],
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(30);
        let recovered = recover_stale_jobs(&store, &ActiveJobs::new(), cutoff)
            .await
            .unwrap();

        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].job_id, quiet.id);
        let busy = store.get(busy.id).await.unwrap().unwrap();
        assert_eq!(busy.status, JobStatus::InProgress);
        assert!(busy.in_progress);
    }

    #[tokio::test]
    async fn retry_items_keeps_only_unfinished_items() {
        let store = MemoryJobStore::new();
        let items = repos(&["a", "b", "c", "d"]);
        let job = store
            .create(NewJob::new("u", JobType::Mirror, ids(&items)))
            .await
            .unwrap();
        store.start(job.id, Utc::now()).await.unwrap();
        store
            .checkpoint(
                job.id,
                &Checkpoint {
                    completed_item_ids: vec!["acme/a".into(), "acme/c".into()],
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let job = store.get(job.id).await.unwrap().unwrap();

        let retry = retry_items(&job, items);
        let names: Vec<_> = retry.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d"]);
    }
}
