//! Audit trail constants and entry construction.
//!
//! Entries are `(action, entity, entity_id, actor, old_state, new_state)`
//! tuples; the store layer persists them as-is.

use serde::{Deserialize, Serialize};

use crate::lock::RuleLock;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Action constants
// ---------------------------------------------------------------------------

pub mod actions {
    pub const LOCK_ACQUIRE: &str = "lock_acquire";
    pub const LOCK_RELEASE: &str = "lock_release";
    pub const LOCK_FORCE_RELEASE: &str = "lock_force_release";
    pub const TRAVERSAL_RUN: &str = "traversal_run";
    pub const RULE_RUN: &str = "rule_run";
    pub const SCHEDULE_EXECUTE: &str = "schedule_execute";
}

pub mod entities {
    pub const RULE: &str = "rule";
    pub const TRAVERSAL: &str = "traversal";
    pub const SCHEDULE: &str = "schedule";
}

/// One audit entry, ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub entity: String,
    pub entity_id: Option<DbId>,
    pub actor: String,
    pub old_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(action: &str, entity: &str, entity_id: Option<DbId>, actor: &str) -> Self {
        Self {
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id,
            actor: actor.to_string(),
            old_state: None,
            new_state: None,
        }
    }

    pub fn with_old_state(mut self, state: serde_json::Value) -> Self {
        self.old_state = Some(state);
        self
    }

    pub fn with_new_state(mut self, state: serde_json::Value) -> Self {
        self.new_state = Some(state);
        self
    }
}

/// JSON snapshot of a lock row for audit states.
pub fn lock_state(lock: &RuleLock) -> serde_json::Value {
    serde_json::json!({
        "locked_by": lock.locked_by,
        "acquired_at": lock.acquired_at,
        "expires_at": lock.expires_at,
        "is_forced": lock.is_forced,
    })
}
