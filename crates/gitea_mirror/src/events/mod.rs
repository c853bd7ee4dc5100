//! Progress notifications for observers of running jobs.
//!
//! Events are hints: a consumer that sees one should re-read the job record.
//! Observers get progress at least once through that record, which is written
//! at every checkpoint and again at the end; polling it never misses the
//! final state. Every event the emitter accepts is flushed before the batch
//! returns, but a full channel may drop one, and order across items is not
//! kept. The batch never waits on or fails because of event delivery.

mod emitter;
mod sink;

use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::batch::ItemStatus;
use crate::entity::job_status::JobStatus;

pub use emitter::{EVENT_CHANNEL_CAPACITY, EVENT_DRAIN_TIMEOUT, EmitterReport, EventEmitter};
pub use sink::{
    BroadcastEventSink, EventSink, PublishedEvent, SqlEventSink, UserSubscription, poll_events,
};

/// Channel carrying job lifecycle and per-item progress.
pub const JOB_PROGRESS_CHANNEL: &str = "job-progress";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event channel closed")]
    ChannelClosed,
}

/// An event ready to be appended to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub user_id: String,
    pub channel: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NewEvent {
    pub fn new(
        user_id: impl Into<String>,
        channel: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            channel: channel.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Serialize `payload` into an event.
    pub fn json<T: Serialize>(
        user_id: impl Into<String>,
        channel: impl Into<String>,
        payload: &T,
    ) -> Result<Self, EventError> {
        Ok(Self::new(user_id, channel, serde_json::to_value(payload)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Started,
    ItemFinished,
    Finished,
}

/// Payload published on [`JOB_PROGRESS_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: Uuid,
    pub batch_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_status: Option<ItemStatus>,
    pub completed: usize,
    pub total: usize,
    pub message: String,
}
