//! The batch orchestrator.
//!
//! One logical task per batch: it creates the job record, fans items out to
//! tokio tasks through the concurrency limiter and retry policy, fans results
//! back in through a `JoinSet`, checkpoints progress and finally writes the
//! terminal status together with the last checkpoint.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{AcquireError, OwnedSemaphorePermit};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entity::job_status::JobStatus;
use crate::entity::job_type::JobType;
use crate::events::{EventEmitter, EventSink, JOB_PROGRESS_CHANNEL, JobEvent, JobEventKind};
use crate::item::{ItemError, MirrorItem, short_error_message};
use crate::retry::{RetryPolicy, run_with_policy};
use crate::store::{Completion, JobStore, NewJob, StoreError};

use super::checkpoint::Checkpointer;
use super::errors::BatchError;
use super::limiter::ConcurrencyLimiter;
use super::progress::{ProgressUpdate, RetryCallback, RetryNotice, emit_progress, emit_retry};
use super::recovery::{ActiveJobs, RecoveredJob, recover_orphaned_jobs};
use super::types::{
    BatchConfig, BatchOutcome, ItemOutcome, ItemStatus, RetryPredicate, should_retry,
};

const PANICKED_ITEM_ERROR: &str = "item task panicked";

/// Message of a job whose record was created but could not be started.
pub const START_FAILED_MESSAGE: &str = "Job never started: the job store rejected the start";

/// Runs batches against a job store, optionally publishing events.
#[derive(Clone)]
pub struct BatchEngine {
    store: Arc<dyn JobStore>,
    events: Option<Arc<dyn EventSink>>,
}

/// Handle to a batch running in the background.
#[derive(Debug)]
pub struct BatchTicket {
    pub batch_id: Uuid,
    handle: JoinHandle<Result<BatchOutcome, BatchError>>,
}

impl BatchTicket {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the batch. Only needed when the caller wants the outcome.
    pub async fn wait(self) -> Result<BatchOutcome, BatchError> {
        self.handle.await.map_err(|e| BatchError::TaskFailed {
            message: e.to_string(),
        })?
    }
}

/// What an item task reports back.
struct ItemRun {
    index: usize,
    item_id: String,
    item_name: String,
    result: Result<(), ItemError>,
    attempts: u32,
}

enum Step {
    Dispatch(Result<OwnedSemaphorePermit, AcquireError>),
    Finished(Result<ItemRun, JoinError>),
}

impl BatchEngine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            events: None,
        }
    }

    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Fail jobs left running by a previous process. See
    /// [`recover_orphaned_jobs`].
    pub async fn recover_orphans(
        &self,
        active: &ActiveJobs,
    ) -> Result<Vec<RecoveredJob>, StoreError> {
        recover_orphaned_jobs(self.store.as_ref(), active).await
    }

    /// Start a batch on its own task and return immediately.
    ///
    /// Progress is observable through the job record and events only.
    pub fn spawn_batch<I, F, Fut>(
        &self,
        items: Vec<I>,
        operation: F,
        mut config: BatchConfig,
    ) -> BatchTicket
    where
        I: MirrorItem + Clone + Send + Sync + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ItemError>> + Send + 'static,
    {
        let batch_id = *config.batch_id.get_or_insert_with(Uuid::new_v4);
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let result = engine.run(items, operation, config).await;
            if let Err(e) = &result {
                error!(%batch_id, error = %e, "Background batch failed");
            }
            result
        });
        BatchTicket { batch_id, handle }
    }

    /// Mirror every item and record the result in a new job.
    ///
    /// Item failures do not fail the call; they show up in the outcome and
    /// make the job `failed`. Errors are returned only for invalid input and
    /// for an unreachable job store.
    #[tracing::instrument(
        skip_all,
        fields(user_id = %config.user_id, job_type = %config.job_type, items = items.len())
    )]
    pub async fn run<I, F, Fut>(
        &self,
        items: Vec<I>,
        operation: F,
        config: BatchConfig,
    ) -> Result<BatchOutcome, BatchError>
    where
        I: MirrorItem + Clone + Send + Sync + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ItemError>> + Send + 'static,
    {
        if items.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        config.validate()?;

        let total = items.len();
        let item_ids: Vec<String> = items.iter().map(MirrorItem::item_id).collect();
        let item_names: Vec<String> = items.iter().map(MirrorItem::item_name).collect();
        let batch_id = config.batch_id.unwrap_or_else(Uuid::new_v4);

        let mut new_job = NewJob::new(&config.user_id, config.job_type, item_ids.clone())
            .with_batch_id(batch_id)
            .with_message(format!("Queued {total} items"));
        if let Some(target) = &config.target {
            new_job = new_job.with_target(target.clone());
        }
        let job = self.store.create(new_job).await?;
        let job_id = job.id;

        // Registered before the job turns in_progress so recovery never
        // mistakes it for an orphan.
        let _active = config.active_jobs.as_ref().map(|a| a.register(job_id));
        if let Err(e) = self.store.start(job_id, Utc::now()).await {
            // Nothing recovers a pending job later; close it out now.
            if let Err(close_err) = self
                .store
                .fail_orphan(job_id, START_FAILED_MESSAGE, Utc::now())
                .await
            {
                warn!(%job_id, error = %close_err, "Failed to close out job that never started");
            }
            return Err(e.into());
        }
        info!(%job_id, %batch_id, total, "Batch started");

        let emitter = match &self.events {
            Some(sink) => EventEmitter::spawn(Arc::clone(sink)),
            None => EventEmitter::disabled(),
        };
        let notifier = JobNotifier {
            emitter: &emitter,
            user_id: &config.user_id,
            job_id,
            batch_id,
            total,
        };
        notifier.send(
            JobEventKind::Started,
            JobStatus::InProgress,
            0,
            None,
            format!("{} {total} items", progress_verb(config.job_type)),
        );

        let limiter = ConcurrencyLimiter::new(config.concurrency_limit);
        let operation = Arc::new(operation);
        let mut checkpointer = Checkpointer::new(job_id, &item_ids, config.checkpoint_interval);
        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; total];
        let mut in_flight: HashSet<usize> = HashSet::new();
        let mut tasks: JoinSet<ItemRun> = JoinSet::new();
        let mut pending = items.into_iter().enumerate();
        let mut next = pending.next();
        let mut tally = Tally::default();
        let mut cancelled = false;

        loop {
            if next.is_some() && !cancelled && config.is_cancelled() {
                cancelled = true;
                limiter.close();
                info!(%job_id, completed = tally.completed, total, "Cancellation requested; no further dispatch");
            }

            let step = if next.is_some() && !cancelled {
                tokio::select! {
                    biased;
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => Step::Finished(joined),
                    permit = limiter.acquire() => Step::Dispatch(permit),
                }
            } else {
                match tasks.join_next().await {
                    Some(joined) => Step::Finished(joined),
                    None => break,
                }
            };

            match step {
                Step::Dispatch(Ok(permit)) => {
                    if config.is_cancelled() {
                        continue;
                    }
                    let Some((index, item)) = next.take() else {
                        continue;
                    };
                    next = pending.next();
                    in_flight.insert(index);
                    tasks.spawn(run_item(
                        index,
                        item,
                        Arc::clone(&operation),
                        config.retry.clone(),
                        config.on_retry.clone(),
                        config.retry_if.clone(),
                        permit,
                    ));
                }
                Step::Dispatch(Err(_)) => cancelled = true,
                Step::Finished(Ok(run)) => {
                    in_flight.remove(&run.index);
                    let index = run.index;
                    let outcome = tally.record(run, &mut checkpointer);
                    outcomes[index] = Some(outcome.clone());

                    emit_progress(
                        config.on_progress.as_ref(),
                        ProgressUpdate {
                            completed: tally.completed,
                            succeeded: tally.succeeded,
                            failed: tally.failed,
                            total,
                            last: outcome.clone(),
                        },
                    );
                    notifier.item_finished(&outcome, tally.completed);

                    if checkpointer.is_due() && tally.completed < total {
                        let snapshot = checkpointer.snapshot();
                        match self.store.checkpoint(job_id, &snapshot).await {
                            Ok(()) => {
                                checkpointer.mark_written(&snapshot);
                                debug!(%job_id, completed = snapshot.completed_items(), "Checkpoint written");
                            }
                            Err(e) => {
                                warn!(%job_id, error = %e, "Checkpoint write failed; continuing from the previous checkpoint");
                            }
                        }
                    }
                }
                Step::Finished(Err(e)) => {
                    error!(%job_id, error = %e, "Item task failed to complete");
                }
            }
        }

        // Whatever is still in flight here panicked.
        for index in in_flight {
            tally.completed += 1;
            tally.failed += 1;
            outcomes[index] = Some(ItemOutcome {
                item_id: item_ids[index].clone(),
                item_name: item_names[index].clone(),
                status: ItemStatus::Failed,
                attempts: 0,
                error: Some(PANICKED_ITEM_ERROR.to_string()),
            });
        }

        let outcomes: Vec<ItemOutcome> = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| {
                outcome.unwrap_or_else(|| {
                    ItemOutcome::skipped(item_ids[i].clone(), item_names[i].clone())
                })
            })
            .collect();

        let status = if cancelled || tally.failed > 0 {
            JobStatus::Failed
        } else {
            config.job_type.success_status()
        };
        let message = terminal_message(config.job_type, &tally, total, cancelled);
        let completion = Completion {
            status,
            message: message.clone(),
            details: failure_details(&outcomes),
            checkpoint: checkpointer.snapshot(),
        };

        let finished = self.store.finish(job_id, &completion).await;
        if finished.is_ok() {
            notifier.send(
                JobEventKind::Finished,
                status,
                tally.completed,
                None,
                message.clone(),
            );
        }
        let report = emitter.close().await;
        if report.dropped > 0 || report.failed > 0 {
            warn!(%job_id, dropped = report.dropped, failed = report.failed, "Some progress events were not delivered");
        }
        finished?;

        info!(
            %job_id,
            %status,
            succeeded = tally.succeeded,
            failed = tally.failed,
            cancelled,
            "Batch finished"
        );

        Ok(BatchOutcome {
            job_id,
            batch_id,
            status,
            message,
            remaining_item_ids: checkpointer
                .remaining(&item_ids)
                .into_iter()
                .map(str::to_owned)
                .collect(),
            outcomes,
            cancelled,
        })
    }
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    succeeded: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, run: ItemRun, checkpointer: &mut Checkpointer) -> ItemOutcome {
        self.completed += 1;
        let (status, error) = match run.result {
            Ok(()) => {
                self.succeeded += 1;
                checkpointer.record_success(&run.item_id);
                (ItemStatus::Succeeded, None)
            }
            Err(e) => {
                self.failed += 1;
                warn!(
                    item = %run.item_name,
                    attempts = run.attempts,
                    error = %e,
                    "Item failed after all attempts"
                );
                (ItemStatus::Failed, Some(short_error_message(&e)))
            }
        };
        ItemOutcome {
            item_id: run.item_id,
            item_name: run.item_name,
            status,
            attempts: run.attempts,
            error,
        }
    }
}

async fn run_item<I, F, Fut>(
    index: usize,
    item: I,
    operation: Arc<F>,
    policy: RetryPolicy,
    on_retry: Option<RetryCallback>,
    retry_if: Option<RetryPredicate>,
    _permit: OwnedSemaphorePermit,
) -> ItemRun
where
    I: MirrorItem + Clone + Send + Sync + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ItemError>> + Send + 'static,
{
    let item_id = item.item_id();
    let item_name = item.item_name();

    let outcome = run_with_policy(
        &policy,
        || operation(item.clone()),
        |err: &ItemError, attempt, delay| {
            emit_retry(
                on_retry.as_ref(),
                RetryNotice {
                    item_id: item_id.clone(),
                    item_name: item_name.clone(),
                    error: short_error_message(err),
                    attempt,
                    delay,
                },
            );
        },
        |err: &ItemError| should_retry(retry_if.as_ref(), err),
    )
    .await;

    ItemRun {
        index,
        item_id,
        item_name,
        result: outcome.result,
        attempts: outcome.attempts,
    }
}

fn progress_verb(job_type: JobType) -> &'static str {
    match job_type {
        JobType::Sync => "Syncing",
        JobType::Mirror | JobType::Retry => "Mirroring",
    }
}

fn terminal_message(job_type: JobType, tally: &Tally, total: usize, cancelled: bool) -> String {
    if cancelled {
        format!("Batch cancelled after {} of {total} items", tally.completed)
    } else if tally.failed > 0 {
        format!("{} of {total} items failed", tally.failed)
    } else {
        let verb = match job_type {
            JobType::Sync => "Synced",
            JobType::Mirror | JobType::Retry => "Mirrored",
        };
        format!("{verb} {} of {total} items", tally.succeeded)
    }
}

fn failure_details(outcomes: &[ItemOutcome]) -> Option<serde_json::Value> {
    let failed: Vec<_> = outcomes
        .iter()
        .filter(|o| o.status == ItemStatus::Failed)
        .map(|o| {
            json!({
                "item_id": o.item_id,
                "item_name": o.item_name,
                "attempts": o.attempts,
                "error": o.error,
            })
        })
        .collect();
    let skipped: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.status == ItemStatus::Skipped)
        .map(|o| o.item_id.as_str())
        .collect();

    if failed.is_empty() && skipped.is_empty() {
        return None;
    }
    Some(json!({ "failed_items": failed, "skipped_item_ids": skipped }))
}

struct JobNotifier<'a> {
    emitter: &'a EventEmitter,
    user_id: &'a str,
    job_id: Uuid,
    batch_id: Uuid,
    total: usize,
}

impl JobNotifier<'_> {
    fn send(
        &self,
        kind: JobEventKind,
        status: JobStatus,
        completed: usize,
        item: Option<&ItemOutcome>,
        message: String,
    ) {
        let event = JobEvent {
            kind,
            job_id: self.job_id,
            batch_id: self.batch_id,
            status,
            item_id: item.map(|o| o.item_id.clone()),
            item_name: item.map(|o| o.item_name.clone()),
            item_status: item.map(|o| o.status),
            completed,
            total: self.total,
            message,
        };
        self.emitter
            .emit_json(self.user_id, JOB_PROGRESS_CHANNEL, &event);
    }

    fn item_finished(&self, outcome: &ItemOutcome, completed: usize) {
        let message = match (&outcome.status, &outcome.error) {
            (ItemStatus::Failed, Some(error)) => format!("{} failed: {error}", outcome.item_name),
            _ => format!("{} done", outcome.item_name),
        };
        self.send(
            JobEventKind::ItemFinished,
            JobStatus::InProgress,
            completed,
            Some(outcome),
            message,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::DateTime;

    use crate::entity::mirror_job::Model as JobModel;
    use crate::events::BroadcastEventSink;
    use crate::store::{Checkpoint, MemoryJobStore, Result as StoreResult};

    #[derive(Debug, Clone)]
    struct TestItem(usize);

    impl MirrorItem for TestItem {
        fn item_id(&self) -> String {
            format!("item-{}", self.0)
        }

        fn item_name(&self) -> String {
            format!("acme/repo-{}", self.0)
        }
    }

    fn items(n: usize) -> Vec<TestItem> {
        (1..=n).map(TestItem).collect()
    }

    fn config() -> BatchConfig {
        BatchConfig::new("user-1", JobType::Mirror).with_retry_delay(Duration::from_millis(10))
    }

    /// Wraps a store and records every progress write.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryJobStore,
        checkpoints: Mutex<Vec<Checkpoint>>,
        finishes: AtomicUsize,
        fail_checkpoints: bool,
        fail_start: bool,
    }

    #[async_trait]
    impl JobStore for CountingStore {
        async fn create(&self, job: NewJob) -> StoreResult<JobModel> {
            self.inner.create(job).await
        }
        async fn get(&self, id: Uuid) -> StoreResult<Option<JobModel>> {
            self.inner.get(id).await
        }
        async fn start(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
            if self.fail_start {
                return Err(StoreError::Database(sea_orm::DbErr::Custom(
                    "connection reset".to_string(),
                )));
            }
            self.inner.start(id, at).await
        }
        async fn checkpoint(&self, id: Uuid, checkpoint: &Checkpoint) -> StoreResult<()> {
            self.checkpoints
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(checkpoint.clone());
            if self.fail_checkpoints {
                return Err(StoreError::NotRunning { id });
            }
            self.inner.checkpoint(id, checkpoint).await
        }
        async fn finish(&self, id: Uuid, completion: &Completion) -> StoreResult<()> {
            self.finishes.fetch_add(1, Ordering::SeqCst);
            self.inner.finish(id, completion).await
        }
        async fn fail_orphan(&self, id: Uuid, message: &str, at: DateTime<Utc>) -> StoreResult<bool> {
            self.inner.fail_orphan(id, message, at).await
        }
        async fn find_in_progress(&self) -> StoreResult<Vec<JobModel>> {
            self.inner.find_in_progress().await
        }
        async fn find_by_batch(&self, batch_id: Uuid) -> StoreResult<Vec<JobModel>> {
            self.inner.find_by_batch(batch_id).await
        }
        async fn find_by_user(&self, owner_id: &str, limit: u64) -> StoreResult<Vec<JobModel>> {
            self.inner.find_by_user(owner_id, limit).await
        }
    }

    async fn ok_op(_item: TestItem) -> Result<(), ItemError> {
        Ok(())
    }

    #[tokio::test]
    async fn all_items_succeed() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = BatchEngine::new(store.clone());

        let outcome = engine
            .run(items(10), ok_op, config().with_concurrency_limit(3))
            .await
            .expect("batch should run");

        assert_eq!(outcome.status, JobStatus::Mirrored);
        assert_eq!(outcome.message, "Mirrored 10 of 10 items");
        assert_eq!(outcome.succeeded(), 10);
        assert!(outcome.remaining_item_ids.is_empty());
        assert!(!outcome.cancelled);

        let job = store.get(outcome.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Mirrored);
        assert!(!job.in_progress);
        assert_eq!(job.completed_items, 10);
        assert_eq!(job.completed_item_ids().len(), 10);
        assert!(job.completed_at.is_some());
        assert!(job.details.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_item_is_retried_then_recorded() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = BatchEngine::new(store.clone());
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_capture = Arc::clone(&attempts);

        let outcome = engine
            .run(
                items(5),
                move |item: TestItem| {
                    let attempts = Arc::clone(&attempts_capture);
                    async move {
                        if item.0 == 3 {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            return Err(ItemError::api("502 Bad Gateway"));
                        }
                        Ok(())
                    }
                },
                config().with_max_retries(2),
            )
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.message, "1 of 5 items failed");
        assert_eq!(outcome.remaining_item_ids, vec!["item-3"]);

        let failed = &outcome.outcomes[2];
        assert_eq!(failed.status, ItemStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.error.as_deref(), Some("API error: 502 Bad Gateway"));

        let job = store.get(outcome.job_id).await.unwrap().unwrap();
        assert_eq!(job.completed_items, 4);
        assert_eq!(job.remaining_item_ids(), vec!["item-3"]);
        let details = job.details.expect("failure details recorded");
        assert_eq!(details["failed_items"][0]["item_id"], "item-3");
    }

    #[tokio::test]
    async fn empty_batch_creates_nothing() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = BatchEngine::new(store.clone());

        let err = engine
            .run(Vec::<TestItem>::new(), ok_op, config())
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::EmptyBatch));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn invalid_config_creates_nothing() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = BatchEngine::new(store.clone());

        let err = engine
            .run(items(2), ok_op, config().with_concurrency_limit(0))
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::InvalidConfig { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_limit() {
        let engine = BatchEngine::new(Arc::new(MemoryJobStore::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_c, peak_c) = (Arc::clone(&active), Arc::clone(&peak));

        let outcome = engine
            .run(
                items(20),
                move |_item: TestItem| {
                    let active = Arc::clone(&active_c);
                    let peak = Arc::clone(&peak_c);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(25)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                config().with_concurrency_limit(4),
            )
            .await
            .unwrap();

        assert_eq!(outcome.succeeded(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 2, "work should overlap");
    }

    #[tokio::test]
    async fn checkpoint_writes_are_bounded_and_consistent() {
        let store = Arc::new(CountingStore::default());
        let engine = BatchEngine::new(store.clone());
        let total = 10;
        let interval = 3;

        let outcome = engine
            .run(
                items(total),
                ok_op,
                config()
                    .with_concurrency_limit(2)
                    .with_checkpoint_interval(interval),
            )
            .await
            .unwrap();

        let checkpoints = store.checkpoints.lock().unwrap().clone();
        let writes = checkpoints.len() + store.finishes.load(Ordering::SeqCst);
        assert!(writes <= total.div_ceil(interval) + 1, "{writes} writes");
        assert_eq!(store.finishes.load(Ordering::SeqCst), 1);

        let mut last_at = None;
        for cp in &checkpoints {
            assert_eq!(cp.completed_items() as usize, cp.completed_item_ids.len());
            assert!(last_at.is_none_or(|prev| prev <= cp.at));
            last_at = Some(cp.at);
        }

        let job = store.get(outcome.job_id).await.unwrap().unwrap();
        assert_eq!(job.completed_items, 10);
    }

    #[tokio::test]
    async fn checkpoint_failures_do_not_stop_the_batch() {
        let store = Arc::new(CountingStore {
            fail_checkpoints: true,
            ..CountingStore::default()
        });
        let engine = BatchEngine::new(store.clone());

        let outcome = engine
            .run(items(6), ok_op, config().with_checkpoint_interval(1))
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Mirrored);
        assert!(!store.checkpoints.lock().unwrap().is_empty());
        let job = store.get(outcome.job_id).await.unwrap().unwrap();
        assert_eq!(job.completed_items, 6);
    }

    #[tokio::test]
    async fn job_that_cannot_start_is_not_left_pending() {
        let store = Arc::new(CountingStore {
            fail_start: true,
            ..CountingStore::default()
        });
        let engine = BatchEngine::new(store.clone());

        let err = engine.run(items(3), ok_op, config()).await.unwrap_err();
        assert!(matches!(err, BatchError::Store(StoreError::Database(_))), "{err}");

        let jobs = store.find_by_user("user-1", 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(!jobs[0].in_progress);
        assert_eq!(jobs[0].message, START_FAILED_MESSAGE);
        assert!(jobs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_and_fails_the_job() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = BatchEngine::new(store.clone());
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_on_progress = Arc::clone(&cancel);

        let outcome = engine
            .run(
                items(10),
                ok_op,
                config()
                    .with_concurrency_limit(1)
                    .with_cancel_flag(Arc::clone(&cancel))
                    .with_progress(Arc::new(move |update: ProgressUpdate| {
                        if update.completed == 4 {
                            cancel_on_progress.store(true, Ordering::SeqCst);
                        }
                    })),
            )
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.message.starts_with("Batch cancelled after"));
        assert!(outcome.skipped() > 0);
        assert_eq!(
            outcome.succeeded() + outcome.skipped(),
            10,
            "nothing fails on cancellation"
        );
        assert_eq!(outcome.remaining_item_ids.len(), outcome.skipped());

        let job = store.get(outcome.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.in_progress);
        assert_eq!(job.completed_items as usize, outcome.succeeded());
    }

    #[tokio::test]
    async fn sync_jobs_end_synced() {
        let engine = BatchEngine::new(Arc::new(MemoryJobStore::new()));
        let outcome = engine
            .run(items(2), ok_op, BatchConfig::new("u", JobType::Sync))
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Synced);
        assert_eq!(outcome.message, "Synced 2 of 2 items");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_notices_carry_attempt_numbers() {
        let engine = BatchEngine::new(Arc::new(MemoryJobStore::new()));
        let notices: Arc<Mutex<Vec<RetryNotice>>> = Arc::new(Mutex::new(Vec::new()));
        let notices_capture = Arc::clone(&notices);

        let outcome = engine
            .run(
                items(1),
                |_item: TestItem| async { Err(ItemError::network("reset by peer")) },
                config()
                    .with_max_retries(2)
                    .with_retry_callback(Arc::new(move |notice| {
                        notices_capture
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(notice);
                    })),
            )
            .await
            .unwrap();

        assert_eq!(outcome.failed(), 1);
        let notices = notices.lock().unwrap();
        let attempts: Vec<u32> = notices.iter().map(|n| n.attempt).collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(notices[0].item_name, "acme/repo-1");
        assert_eq!(notices[1].delay, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn retry_if_short_circuits_permanent_errors() {
        let engine = BatchEngine::new(Arc::new(MemoryJobStore::new()));
        let outcome = engine
            .run(
                items(1),
                |_item: TestItem| async { Err(ItemError::AuthRequired) },
                config()
                    .with_max_retries(5)
                    .with_retry_if(Arc::new(ItemError::is_transient)),
            )
            .await
            .unwrap();
        assert_eq!(outcome.outcomes[0].attempts, 1);
    }

    #[tokio::test]
    async fn events_are_published_for_start_items_and_finish() {
        let sink = Arc::new(BroadcastEventSink::new(64));
        let mut subscription = sink.subscribe("user-1");
        let engine = BatchEngine::new(Arc::new(MemoryJobStore::new())).with_event_sink(sink.clone());

        let outcome = engine.run(items(3), ok_op, config()).await.unwrap();
        drop(engine);
        drop(sink);

        let mut kinds = Vec::new();
        while let Some(event) = subscription.recv().await {
            let payload: JobEvent = serde_json::from_value(event.payload.clone()).unwrap();
            assert_eq!(payload.job_id, outcome.job_id);
            kinds.push(payload.kind);
        }
        assert_eq!(kinds.first(), Some(&JobEventKind::Started));
        assert_eq!(kinds.last(), Some(&JobEventKind::Finished));
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == JobEventKind::ItemFinished)
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn job_is_registered_as_active_only_while_running() {
        let engine = BatchEngine::new(Arc::new(MemoryJobStore::new()));
        let active = ActiveJobs::new();
        let seen_active = Arc::new(AtomicBool::new(false));
        let (active_c, seen_c) = (active.clone(), Arc::clone(&seen_active));

        engine
            .run(
                items(1),
                move |_item: TestItem| {
                    let active = active_c.clone();
                    let seen = Arc::clone(&seen_c);
                    async move {
                        seen.store(active.len() == 1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                config().with_active_jobs(active.clone()),
            )
            .await
            .unwrap();

        assert!(seen_active.load(Ordering::SeqCst));
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn spawn_batch_returns_before_completion() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = BatchEngine::new(store.clone());
        let batch_id = Uuid::new_v4();

        let ticket = engine.spawn_batch(items(4), ok_op, config().with_batch_id(batch_id));
        assert_eq!(ticket.batch_id, batch_id);

        let outcome = ticket.wait().await.unwrap();
        assert_eq!(outcome.batch_id, batch_id);
        let jobs = store.find_by_batch(batch_id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Mirrored);
    }

    #[tokio::test]
    async fn resubmission_creates_a_new_job() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = BatchEngine::new(store.clone());
        let fail_once = Arc::new(AtomicBool::new(true));
        let fail_c = Arc::clone(&fail_once);

        let first = engine
            .run(
                items(2),
                move |_item: TestItem| {
                    let fail = fail_c.load(Ordering::SeqCst);
                    async move {
                        if fail {
                            Err(ItemError::network("down"))
                        } else {
                            Ok(())
                        }
                    }
                },
                config().with_max_retries(0),
            )
            .await
            .unwrap();
        let before = store.get(first.job_id).await.unwrap().unwrap();

        fail_once.store(false, Ordering::SeqCst);
        let second = engine.run(items(2), ok_op, config()).await.unwrap();

        assert_ne!(first.job_id, second.job_id);
        assert_eq!(store.get(first.job_id).await.unwrap().unwrap(), before);
        assert_eq!(second.status, JobStatus::Mirrored);
    }

    #[test]
    fn details_list_failed_and_skipped_items() {
        let outcomes = vec![
            ItemOutcome {
                item_id: "a".into(),
                item_name: "a".into(),
                status: ItemStatus::Succeeded,
                attempts: 1,
                error: None,
            },
            ItemOutcome {
                item_id: "b".into(),
                item_name: "b".into(),
                status: ItemStatus::Failed,
                attempts: 3,
                error: Some("boom".into()),
            },
            ItemOutcome::skipped("c".into(), "c".into()),
        ];
        let details = failure_details(&outcomes).unwrap();
        assert_eq!(details["failed_items"][0]["attempts"], 3);
        assert_eq!(details["skipped_item_ids"], json!(["c"]));
        assert!(failure_details(&outcomes[..1]).is_none());
    }
}
