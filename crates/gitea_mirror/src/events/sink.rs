use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::entity::event::{ActiveModel, Column, Entity as Event, Model};

use super::{EventError, NewEvent};

/// Destination for appended events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: NewEvent) -> Result<(), EventError>;
}

/// Appends events to the `events` table.
#[derive(Debug, Clone)]
pub struct SqlEventSink {
    db: Arc<DatabaseConnection>,
}

impl SqlEventSink {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventSink for SqlEventSink {
    async fn append(&self, event: NewEvent) -> Result<(), EventError> {
        ActiveModel {
            user_id: Set(event.user_id),
            channel: Set(event.channel),
            payload: Set(event.payload),
            read: Set(false),
            created_at: Set(event.created_at.fixed_offset()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }
}

/// Read a user's events in insertion order.
///
/// `after` is exclusive; pass the `id` of the last event seen. Ids follow
/// insertion, not `created_at`, which is stamped when the event is emitted
/// and can land out of order when several batches write at once.
pub async fn poll_events(
    db: &DatabaseConnection,
    user_id: &str,
    channel: Option<&str>,
    after: Option<i32>,
    limit: u64,
) -> Result<Vec<Model>, EventError> {
    let mut query = Event::find().filter(Column::UserId.eq(user_id));
    if let Some(channel) = channel {
        query = query.filter(Column::Channel.eq(channel));
    }
    if let Some(after) = after {
        query = query.filter(Column::Id.gt(after));
    }
    Ok(query
        .order_by_asc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

/// An event as seen by live subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub id: Uuid,
    pub user_id: String,
    pub channel: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// In-process push channel; each subscriber sees only its user's events.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<Arc<PublishedEvent>>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self, user_id: impl Into<String>) -> UserSubscription {
        UserSubscription {
            user_id: user_id.into(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn append(&self, event: NewEvent) -> Result<(), EventError> {
        let published = Arc::new(PublishedEvent {
            id: Uuid::new_v4(),
            user_id: event.user_id,
            channel: event.channel,
            payload: event.payload,
            created_at: event.created_at,
        });
        // No subscribers is not a failure; the job record stays authoritative.
        if self.tx.send(published).is_err() {
            trace!("No live subscribers for event");
        }
        Ok(())
    }
}

/// Receiving half of a per-user subscription.
#[derive(Debug)]
pub struct UserSubscription {
    user_id: String,
    rx: broadcast::Receiver<Arc<PublishedEvent>>,
}

impl UserSubscription {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Next event for this user, or `None` once the sink is gone.
    ///
    /// A slow subscriber skips events it lagged behind on.
    pub async fn recv(&mut self) -> Option<Arc<PublishedEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.user_id == self.user_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(user_id = %self.user_id, skipped, "Subscriber lagged; events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_only_see_their_user() {
        let sink = BroadcastEventSink::new(16);
        let mut alice = sink.subscribe("alice");
        let mut bob = sink.subscribe("bob");

        sink.append(NewEvent::new("bob", "job-progress", json!({"n": 1})))
            .await
            .unwrap();
        sink.append(NewEvent::new("alice", "job-progress", json!({"n": 2})))
            .await
            .unwrap();
        drop(sink);

        let event = alice.recv().await.expect("alice gets her event");
        assert_eq!(event.payload, json!({"n": 2}));
        assert!(alice.recv().await.is_none());

        let event = bob.recv().await.expect("bob gets his event");
        assert_eq!(event.payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn append_without_subscribers_succeeds() {
        let sink = BroadcastEventSink::new(4);
        assert_eq!(sink.subscriber_count(), 0);
        sink.append(NewEvent::new("u", "c", json!(null)))
            .await
            .expect("publishing to nobody is fine");
    }
}
