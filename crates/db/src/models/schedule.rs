//! Scheduled rule execution rows.

use brm_core::types::{DbId, RunId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Status values stored in `rule_schedules.status`.
pub mod schedule_status {
    pub const SCHEDULED: &str = "Scheduled";
    /// Claimed by a worker; not yet finished.
    pub const RUNNING: &str = "Running";
    pub const EXECUTED: &str = "Executed";
    pub const FAILED: &str = "Failed";
}

/// A row from the `rule_schedules` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RuleSchedule {
    pub id: DbId,
    pub rule_id: DbId,
    pub scheduled_for: Timestamp,
    pub status: String,
    pub run_id: Option<RunId>,
    /// When a worker last claimed the row.
    pub claimed_at: Option<Timestamp>,
    pub executed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}
