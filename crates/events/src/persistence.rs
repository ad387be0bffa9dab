//! Writes engine events to `engine_events`.
//!
//! One task per process subscribes to the bus and inserts events in publish
//! order, keeping each event's own timestamp. It stops once every
//! `Arc<EventBus>` is dropped and the buffered events are written.

use brm_db::repositories::EventRepo;
use brm_db::DbPool;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::bus::EngineEvent;

pub struct EventPersistence;

impl EventPersistence {
    /// Persist events until the bus closes. Returns how many rows were
    /// written. Insert failures are logged and the event is dropped.
    pub async fn run(pool: DbPool, mut receiver: broadcast::Receiver<EngineEvent>) -> u64 {
        let mut written = 0;
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event persistence fell behind, events were dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let stored = EventRepo::insert(
                &pool,
                &event.event_type,
                event.rule_id,
                event.run_id,
                &event.payload,
                event.timestamp,
            )
            .await;
            match stored {
                Ok(event_id) => {
                    written += 1;
                    tracing::trace!(event_id, event_type = %event.event_type, "Event stored");
                }
                Err(e) => tracing::error!(
                    error = %e,
                    event_type = %event.event_type,
                    rule_id = ?event.rule_id,
                    run_id = ?event.run_id,
                    "Failed to persist event"
                ),
            }
        }

        tracing::info!(written, "Event bus closed, persistence stopped");
        written
    }
}
