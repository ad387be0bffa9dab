//! Rule, decision table and rule group rows.

use brm_core::error::CoreError;
use brm_core::rule::{OperationType, Rule, RuleStatus};
use brm_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A row from the `rules` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RuleRow {
    pub id: DbId,
    pub name: String,
    pub operation_type: String,
    pub rule_sql: Option<String>,
    pub decision_table_id: Option<DbId>,
    pub parent_rule_id: Option<DbId>,
    pub status: String,
    pub is_critical: bool,
    pub is_global: bool,
    pub owner_group: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RuleRow {
    /// Convert into the domain type, rejecting unknown status or operation tags.
    pub fn into_rule(self) -> Result<Rule, CoreError> {
        Ok(Rule {
            id: self.id,
            name: self.name,
            operation_type: OperationType::parse(&self.operation_type)?,
            rule_sql: self.rule_sql,
            decision_table_id: self.decision_table_id,
            parent_rule_id: self.parent_rule_id,
            status: RuleStatus::parse(&self.status)?,
            is_critical: self.is_critical,
            is_global: self.is_global,
            owner_group: self.owner_group,
        })
    }
}

/// DTO for inserting a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRule {
    pub name: String,
    pub operation_type: OperationType,
    pub rule_sql: Option<String>,
    pub decision_table_id: Option<DbId>,
    pub parent_rule_id: Option<DbId>,
    pub status: RuleStatus,
    pub is_critical: bool,
    pub is_global: bool,
    pub owner_group: String,
}

impl CreateRule {
    /// An active SQL rule with no parent.
    pub fn sql(name: &str, sql: &str, owner_group: &str) -> Self {
        Self {
            name: name.to_string(),
            operation_type: OperationType::Sql,
            rule_sql: Some(sql.to_string()),
            decision_table_id: None,
            parent_rule_id: None,
            status: RuleStatus::Active,
            is_critical: false,
            is_global: false,
            owner_group: owner_group.to_string(),
        }
    }

    pub fn with_parent(mut self, parent_rule_id: DbId) -> Self {
        self.parent_rule_id = Some(parent_rule_id);
        self
    }
}

// ---------------------------------------------------------------------------
// Decision tables
// ---------------------------------------------------------------------------

/// A row from the `decision_tables` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DecisionTable {
    pub id: DbId,
    pub name: String,
    pub decision_query: String,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// A row from the `rule_groups` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RuleGroup {
    pub id: DbId,
    pub name: String,
    pub created_at: Timestamp,
}
