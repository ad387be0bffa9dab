//! Business rule model: lifecycle status, operation type, and the logic a
//! rule executes.
//!
//! Rules form a forest through `parent_rule_id`. Each rule runs either its
//! own SQL text or the query of a referenced decision table, never both.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Lifecycle status
// ---------------------------------------------------------------------------

/// Rule lifecycle status as stored in `rules.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Draft,
    UnderApproval,
    Approved,
    Active,
    Inactive,
    Rejected,
}

impl RuleStatus {
    pub const ALL: [RuleStatus; 6] = [
        RuleStatus::Draft,
        RuleStatus::UnderApproval,
        RuleStatus::Approved,
        RuleStatus::Active,
        RuleStatus::Inactive,
        RuleStatus::Rejected,
    ];

    /// The database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RuleStatus::Draft => "DRAFT",
            RuleStatus::UnderApproval => "UNDER_APPROVAL",
            RuleStatus::Approved => "APPROVED",
            RuleStatus::Active => "ACTIVE",
            RuleStatus::Inactive => "INACTIVE",
            RuleStatus::Rejected => "REJECTED",
        }
    }

    /// Parse the database representation (case-insensitive, surrounding
    /// whitespace ignored).
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == normalized)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Invalid rule status '{value}'. Must be one of: {}",
                    Self::ALL.map(|s| s.as_str()).join(", ")
                ))
            })
    }
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Operation type
// ---------------------------------------------------------------------------

/// What a rule executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Sql,
    DecisionTable,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Sql => "SQL",
            OperationType::DecisionTable => "DECISION_TABLE",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SQL" => Ok(OperationType::Sql),
            "DECISION_TABLE" => Ok(OperationType::DecisionTable),
            other => Err(CoreError::Validation(format!(
                "Invalid operation type '{other}'. Must be one of: SQL, DECISION_TABLE"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Statement kind detection
// ---------------------------------------------------------------------------

/// Coarse classification of a SQL statement by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Select,
    Other,
}

impl StatementKind {
    /// Whether the statement is expected to produce a result set even when
    /// it matches zero rows.
    pub fn returns_rows(self) -> bool {
        self == StatementKind::Select
    }
}

/// Classify a statement by its first keyword, skipping leading whitespace,
/// `--` line comments, and `/* */` block comments. A `WITH` statement is
/// classified by the statement that follows its CTE list, so
/// `WITH moved AS (DELETE ... RETURNING *) INSERT ...` is an insert.
pub fn detect_statement_kind(sql: &str) -> StatementKind {
    let (keyword, rest) = leading_keyword(sql);
    if keyword.eq_ignore_ascii_case("WITH") {
        return statement_after_ctes(rest);
    }
    keyword_kind(keyword).unwrap_or(StatementKind::Other)
}

fn keyword_kind(keyword: &str) -> Option<StatementKind> {
    match keyword.to_ascii_uppercase().as_str() {
        "INSERT" => Some(StatementKind::Insert),
        "UPDATE" => Some(StatementKind::Update),
        "DELETE" => Some(StatementKind::Delete),
        "SELECT" | "VALUES" | "TABLE" => Some(StatementKind::Select),
        _ => None,
    }
}

/// The leading keyword and the text after it.
fn leading_keyword(sql: &str) -> (&str, &str) {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix('(') {
            rest = after.trim_start();
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    rest.split_at(end)
}

/// Find the first statement keyword outside every parenthesis. CTE bodies
/// sit inside parentheses; names, `RECURSIVE`, `AS` and `MATERIALIZED`
/// are not statement keywords.
fn statement_after_ctes(body: &str) -> StatementKind {
    let mut depth = 0usize;
    let mut chars = body.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '\'' | '"' => {
                for (_, d) in chars.by_ref() {
                    if d == c {
                        break;
                    }
                }
            }
            '-' if chars.peek().is_some_and(|&(_, d)| d == '-') => {
                for (_, d) in chars.by_ref() {
                    if d == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek().is_some_and(|&(_, d)| d == '*') => {
                chars.next();
                let mut star = false;
                for (_, d) in chars.by_ref() {
                    if star && d == '/' {
                        break;
                    }
                    star = d == '*';
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                if depth == 0 {
                    if let Some(kind) = keyword_kind(&body[start..end]) {
                        return kind;
                    }
                }
            }
            _ => {}
        }
    }
    StatementKind::Other
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A business rule as loaded from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: DbId,
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

/// The executable part of a rule, resolved from its operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLogic<'a> {
    Sql(&'a str),
    DecisionTable(DbId),
}

impl Rule {
    /// Resolve what this rule executes, enforcing that exactly one of
    /// `rule_sql` / `decision_table_id` is set to match the operation type.
    pub fn logic(&self) -> Result<RuleLogic<'_>, CoreError> {
        let sql = self.rule_sql.as_deref().filter(|s| !s.trim().is_empty());
        match (self.operation_type, sql, self.decision_table_id) {
            (OperationType::Sql, Some(sql), None) => Ok(RuleLogic::Sql(sql)),
            (OperationType::DecisionTable, None, Some(table_id)) => {
                Ok(RuleLogic::DecisionTable(table_id))
            }
            (OperationType::Sql, None, _) => Err(CoreError::Validation(format!(
                "Rule {} is SQL-based but has no SQL text",
                self.id
            ))),
            (OperationType::DecisionTable, _, None) => Err(CoreError::Validation(format!(
                "Rule {} is decision-table based but references no decision table",
                self.id
            ))),
            (op, _, _) => Err(CoreError::Validation(format!(
                "Rule {} has both SQL text and a decision table (operation type {})",
                self.id,
                op.as_str()
            ))),
        }
    }

    /// Only approved or active rules may be executed.
    pub fn is_executable(&self) -> bool {
        matches!(self.status, RuleStatus::Approved | RuleStatus::Active)
    }

    pub fn is_root(&self) -> bool {
        self.parent_rule_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
