//! Engine event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`EngineEvent`]: the event envelope.
//! - [`EventPersistence`]: background service that writes every event to
//!   the `engine_events` table.

pub mod bus;
pub mod persistence;

pub use bus::{event_types, EngineEvent, EventBus};
pub use persistence::EventPersistence;
