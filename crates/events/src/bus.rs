//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the engine, the
//! worker and the persistence task.

use brm_core::types::{DbId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event names published by the engine.
pub mod event_types {
    pub const TRAVERSAL_COMPLETED: &str = "traversal.completed";
    pub const RULE_FAILED: &str = "rule.failed";
    pub const COMPOSITE_TRIGGERED: &str = "composite.triggered";
    pub const LOCK_FORCED: &str = "lock.forced";
}

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// Something the engine did that collaborators may react to.
///
/// Constructed via [`EngineEvent::new`] and enriched with
/// [`with_rule`](EngineEvent::with_rule), [`with_run`](EngineEvent::with_run)
/// and [`with_payload`](EngineEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Dot-separated event name, e.g. `"rule.failed"`.
    pub event_type: String,
    pub rule_id: Option<DbId>,
    pub run_id: Option<RunId>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            rule_id: None,
            run_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_rule(mut self, rule_id: DbId) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    pub fn with_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest messages are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let run_id = uuid::Uuid::now_v7();

        bus.publish(
            EngineEvent::new(event_types::RULE_FAILED)
                .with_rule(42)
                .with_run(run_id)
                .with_payload(serde_json::json!({"message": "Query returned 0"})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "rule.failed");
        assert_eq!(received.rule_id, Some(42));
        assert_eq!(received.run_id, Some(run_id));
        assert_eq!(received.payload["message"], "Query returned 0");
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(EngineEvent::new(event_types::TRAVERSAL_COMPLETED));

        assert_eq!(rx1.recv().await.unwrap().event_type, "traversal.completed");
        assert_eq!(rx2.recv().await.unwrap().event_type, "traversal.completed");
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::new(event_types::LOCK_FORCED));
    }

    #[test]
    fn bare_event_has_empty_payload() {
        let event = EngineEvent::new("composite.triggered");
        assert!(event.rule_id.is_none());
        assert!(event.run_id.is_none());
        assert!(event.payload.is_object());
    }
}
