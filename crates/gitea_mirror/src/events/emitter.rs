//! Non-blocking event publication.
//!
//! `emit` only ever does a `try_send` into a bounded channel. A background
//! task drains the channel into the sink. Anything that goes wrong on the
//! way (full channel, sink error) is logged and the event dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::{EventSink, NewEvent};

/// Events buffered between the batch and the drain task.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on waiting for buffered events at close.
pub const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery counts for one emitter.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[must_use = "EmitterReport may record dropped or failed events"]
pub struct EmitterReport {
    pub delivered: usize,
    /// The sink rejected the event.
    pub failed: usize,
    /// The channel was full or already closed.
    pub dropped: usize,
    pub panic_info: Option<String>,
}

#[derive(Debug)]
pub struct EventEmitter {
    tx: Option<mpsc::Sender<NewEvent>>,
    handle: Option<JoinHandle<EmitterReport>>,
    dropped: Arc<AtomicUsize>,
}

impl EventEmitter {
    pub fn spawn(sink: Arc<dyn EventSink>) -> Self {
        Self::with_capacity(sink, EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn EventSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<NewEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut report = EmitterReport::default();
            while let Some(event) = rx.recv().await {
                let channel = event.channel.clone();
                match sink.append(event).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(channel = %channel, error = %e, "Dropping event: sink failed");
                    }
                }
            }
            tracing::debug!(
                delivered = report.delivered,
                failed = report.failed,
                "Event drain task finished"
            );
            report
        });

        Self {
            tx: Some(tx),
            handle: Some(handle),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An emitter that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            handle: None,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event without waiting.
    pub fn emit(&self, event: NewEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(channel = %event.channel, "Dropping event: channel full");
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(channel = %event.channel, "Dropping event: drain task gone");
            }
        }
    }

    /// Serialize `payload` and queue it.
    pub fn emit_json<T: Serialize>(&self, user_id: &str, channel: &str, payload: &T) {
        if !self.is_enabled() {
            return;
        }
        match NewEvent::json(user_id, channel, payload) {
            Ok(event) => self.emit(event),
            Err(e) => tracing::warn!(channel, error = %e, "Dropping event: serialization failed"),
        }
    }

    /// Stop accepting events and wait for buffered ones to reach the sink.
    pub async fn close(mut self) -> EmitterReport {
        drop(self.tx.take());
        let dropped = self.dropped.load(Ordering::Relaxed);

        let Some(mut handle) = self.handle.take() else {
            return EmitterReport {
                dropped,
                ..EmitterReport::default()
            };
        };

        let mut report = tokio::select! {
            result = &mut handle => match result {
                Ok(report) => report,
                Err(e) => {
                    let panic_info = if e.is_panic() {
                        let payload = e.into_panic();
                        if let Some(s) = payload.downcast_ref::<&str>() {
                            (*s).to_string()
                        } else if let Some(s) = payload.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        }
                    } else {
                        format!("Task failed: {e}")
                    };
                    tracing::error!(panic_info = %panic_info, "Event drain task failed");
                    EmitterReport {
                        panic_info: Some(panic_info),
                        ..EmitterReport::default()
                    }
                }
            },
            _ = tokio::time::sleep(EVENT_DRAIN_TIMEOUT) => {
                handle.abort();
                tracing::warn!(
                    timeout_secs = EVENT_DRAIN_TIMEOUT.as_secs(),
                    "Event drain timed out; remaining events dropped"
                );
                EmitterReport {
                    panic_info: Some("event drain timed out".to_string()),
                    ..EmitterReport::default()
                }
            }
        };
        report.dropped += dropped;
        report
    }
}
