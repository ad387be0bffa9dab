//! Persisted engine event rows.

use brm_core::types::{DbId, RunId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `engine_events` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EngineEventRow {
    pub id: DbId,
    pub event_type: String,
    pub rule_id: Option<DbId>,
    pub run_id: Option<RunId>,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}
