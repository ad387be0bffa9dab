//! Traversal run rows.

use brm_core::types::{DbId, RunId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `traversal_runs` table. `report` is filled in when the
/// run finishes.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TraversalRun {
    pub run_id: RunId,
    pub started_by: String,
    pub dry_run: bool,
    pub seed_rule_ids: Vec<DbId>,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub report: Option<serde_json::Value>,
}
