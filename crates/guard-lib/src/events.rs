//! Notification sink for dashboards and other observers
//!
//! Publishing is fire-and-forget: no acknowledgement, and a sink with no
//! subscribers drops events silently.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::breaker::Transition;
use crate::models::{Alert, HealthSample, Incident, RecoveryAttempt};

/// Default capacity of the broadcast channel
const DEFAULT_CAPACITY: usize = 1024;

/// Everything the control plane pushes to observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PlaneEvent {
    Sample(HealthSample),
    Alert(Alert),
    Incident(Incident),
    Transition(Transition),
    Recovery(RecoveryAttempt),
}

impl PlaneEvent {
    /// Short name used for SSE event types and logs
    pub fn name(&self) -> &'static str {
        match self {
            PlaneEvent::Sample(_) => "sample",
            PlaneEvent::Alert(_) => "alert",
            PlaneEvent::Incident(_) => "incident",
            PlaneEvent::Transition(_) => "transition",
            PlaneEvent::Recovery(_) => "recovery",
        }
    }
}

/// Publish side of the notification sink
pub trait EventSink: Send + Sync {
    fn publish(&self, event: PlaneEvent);
}

/// Sink that fans events out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<PlaneEvent>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Join the stream. Slow subscribers lag rather than block publishers.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaneEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: PlaneEvent) {
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: PlaneEvent) {}
}
