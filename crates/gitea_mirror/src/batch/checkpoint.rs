//! In-memory progress tracking that decides when to persist a checkpoint.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::store::Checkpoint;

/// Tracks successful items of one job and paces checkpoint writes.
///
/// Completed ids have set semantics and are kept in completion order.
/// Snapshot timestamps never go backwards, even if the wall clock does.
#[derive(Debug)]
pub struct Checkpointer {
    job_id: Uuid,
    interval: usize,
    enrolled: HashSet<String>,
    completed: Vec<String>,
    completed_set: HashSet<String>,
    since_last_write: usize,
    last_written_at: Option<DateTime<Utc>>,
    writes: usize,
}

impl Checkpointer {
    /// `interval` of 0 is treated as 1.
    pub fn new(job_id: Uuid, item_ids: &[String], interval: usize) -> Self {
        Self {
            job_id,
            interval: interval.max(1),
            enrolled: item_ids.iter().cloned().collect(),
            completed: Vec::new(),
            completed_set: HashSet::new(),
            since_last_write: 0,
            last_written_at: None,
            writes: 0,
        }
    }

    /// Record a success. Returns `false` for repeats and unknown ids.
    pub fn record_success(&mut self, item_id: &str) -> bool {
        if !self.enrolled.contains(item_id) {
            warn!(
                job_id = %self.job_id,
                item_id,
                "Ignoring completion of an item not enrolled in the job"
            );
            return false;
        }
        if !self.completed_set.insert(item_id.to_string()) {
            return false;
        }
        self.completed.push(item_id.to_string());
        self.since_last_write += 1;
        true
    }

    /// Whether enough successes accumulated since the last write.
    pub fn is_due(&self) -> bool {
        self.since_last_write >= self.interval
    }

    pub fn completed_items(&self) -> usize {
        self.completed.len()
    }

    pub fn is_completed(&self, item_id: &str) -> bool {
        self.completed_set.contains(item_id)
    }

    /// Snapshot stamped with `max(now, last written)`.
    pub fn snapshot(&self) -> Checkpoint {
        self.snapshot_at(Utc::now())
    }

    pub(crate) fn snapshot_at(&self, now: DateTime<Utc>) -> Checkpoint {
        let at = match self.last_written_at {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        Checkpoint {
            completed_item_ids: self.completed.clone(),
            at,
        }
    }

    /// Call after `checkpoint` was persisted.
    pub fn mark_written(&mut self, checkpoint: &Checkpoint) {
        self.since_last_write = 0;
        self.last_written_at = Some(checkpoint.at);
        self.writes += 1;
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Enrolled ids (in the given order) that have not succeeded.
    pub fn remaining<'a>(&self, item_ids: &'a [String]) -> Vec<&'a str> {
        item_ids
            .iter()
            .filter(|id| !self.completed_set.contains(id.as_str()))
            .map(String::as_str)
            .collect()
    }
}
