//! Conflict, global-critical and composite relation rows.

use brm_core::composite::CompositeDefinition;
use brm_core::graph::{ConflictLink, CriticalLink};
use brm_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `rule_conflicts` table.
#[derive(Debug, Clone, Copy, FromRow, Serialize)]
pub struct RuleConflictRow {
    pub rule_id: DbId,
    pub conflict_rule_id: DbId,
    pub priority: i32,
}

impl From<RuleConflictRow> for ConflictLink {
    fn from(row: RuleConflictRow) -> Self {
        ConflictLink {
            rule_id: row.rule_id,
            conflict_rule_id: row.conflict_rule_id,
            priority: row.priority,
        }
    }
}

/// A row from the `rule_critical_links` table.
#[derive(Debug, Clone, Copy, FromRow, Serialize)]
pub struct CriticalLinkRow {
    pub source_rule_id: DbId,
    pub target_rule_id: DbId,
}

impl From<CriticalLinkRow> for CriticalLink {
    fn from(row: CriticalLinkRow) -> Self {
        CriticalLink {
            source_rule_id: row.source_rule_id,
            target_rule_id: row.target_rule_id,
        }
    }
}

/// A row from the `composite_rules` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CompositeRuleRow {
    pub id: DbId,
    pub name: String,
    pub logic_expr: String,
    pub action_on_pass: Option<String>,
    pub created_at: Timestamp,
}

impl From<CompositeRuleRow> for CompositeDefinition {
    fn from(row: CompositeRuleRow) -> Self {
        CompositeDefinition {
            id: row.id,
            name: row.name,
            logic_expr: row.logic_expr,
            action_on_pass: row.action_on_pass,
        }
    }
}
