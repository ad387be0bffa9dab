//! Pre-flight data validations: definition parsing and query planning.
//!
//! Each check counts the rows that violate it. Table and column names come
//! from configuration, so they are checked against a strict identifier
//! pattern and double-quoted; every other value is a bind parameter.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
});

/// Validate and double-quote a (optionally schema-qualified) identifier.
pub fn quote_identifier(name: &str) -> Result<String, CoreError> {
    let name = name.trim();
    if !IDENTIFIER_RE.is_match(name) {
        return Err(CoreError::Validation(format!(
            "Invalid identifier '{name}'"
        )));
    }
    Ok(name
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join("."))
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A `data_validations` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDefinition {
    pub id: DbId,
    pub table_name: String,
    pub column_name: String,
    pub validation_type: String,
    pub params: serde_json::Value,
    pub description: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationKind {
    NotNull,
    Range { min: Option<f64>, max: Option<f64> },
    Regex { pattern: String },
    AllowedValues { values: Vec<String> },
    Unique,
}

impl ValidationKind {
    pub const TYPES: [&'static str; 5] = ["NOT_NULL", "RANGE", "REGEX", "ALLOWED_VALUES", "UNIQUE"];

    /// Build from the stored type tag and its JSON params.
    pub fn from_parts(
        validation_type: &str,
        params: &serde_json::Value,
    ) -> Result<Self, CoreError> {
        let kind = match validation_type.trim().to_ascii_uppercase().as_str() {
            "NOT_NULL" => ValidationKind::NotNull,
            "UNIQUE" => ValidationKind::Unique,
            "RANGE" => {
                let min = params.get("min").and_then(serde_json::Value::as_f64);
                let max = params.get("max").and_then(serde_json::Value::as_f64);
                match (min, max) {
                    (None, None) => {
                        return Err(CoreError::Validation(
                            "RANGE validation needs at least one of 'min' or 'max'".to_string(),
                        ))
                    }
                    (Some(lo), Some(hi)) if lo > hi => {
                        return Err(CoreError::Validation(format!(
                            "RANGE validation has min {lo} greater than max {hi}"
                        )))
                    }
                    _ => ValidationKind::Range { min, max },
                }
            }
            "REGEX" => {
                let pattern = params
                    .get("pattern")
                    .and_then(serde_json::Value::as_str)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        CoreError::Validation("REGEX validation needs a 'pattern'".to_string())
                    })?;
                ValidationKind::Regex {
                    pattern: pattern.to_string(),
                }
            }
            "ALLOWED_VALUES" => {
                let values: Vec<String> = params
                    .get("values")
                    .and_then(serde_json::Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .map(|v| match v {
                                serde_json::Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                if values.is_empty() {
                    return Err(CoreError::Validation(
                        "ALLOWED_VALUES validation needs a non-empty 'values' list".to_string(),
                    ));
                }
                ValidationKind::AllowedValues { values }
            }
            other => {
                return Err(CoreError::Validation(format!(
                    "Unknown validation type '{other}'. Must be one of: {}",
                    Self::TYPES.join(", ")
                )))
            }
        };
        Ok(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::NotNull => "NOT_NULL",
            ValidationKind::Range { .. } => "RANGE",
            ValidationKind::Regex { .. } => "REGEX",
            ValidationKind::AllowedValues { .. } => "ALLOWED_VALUES",
            ValidationKind::Unique => "UNIQUE",
        }
    }
}

// ---------------------------------------------------------------------------
// Query planning
// ---------------------------------------------------------------------------

/// A typed bind parameter for a check query.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Float(f64),
    Text(String),
    TextArray(Vec<String>),
}

/// A violation-count query. The single result column is a `BIGINT`.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

/// A parsed, ready-to-run validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationCheck {
    pub validation_id: DbId,
    pub table_name: String,
    pub column_name: String,
    pub kind: ValidationKind,
}

impl ValidationCheck {
    pub fn from_definition(def: &ValidationDefinition) -> Result<Self, CoreError> {
        quote_identifier(&def.table_name)?;
        if def.column_name.contains('.') {
            return Err(CoreError::Validation(format!(
                "Invalid column name '{}'",
                def.column_name
            )));
        }
        quote_identifier(&def.column_name)?;
        Ok(Self {
            validation_id: def.id,
            table_name: def.table_name.trim().to_string(),
            column_name: def.column_name.trim().to_string(),
            kind: ValidationKind::from_parts(&def.validation_type, &def.params)?,
        })
    }

    pub fn query(&self) -> Result<CheckQuery, CoreError> {
        let table = quote_identifier(&self.table_name)?;
        let col = quote_identifier(&self.column_name)?;

        let (sql, binds) = match &self.kind {
            ValidationKind::NotNull => (
                format!("SELECT COUNT(*)::bigint FROM {table} WHERE {col} IS NULL"),
                vec![],
            ),
            ValidationKind::Range { min, max } => {
                let mut conditions = Vec::new();
                let mut binds = Vec::new();
                if let Some(min) = min {
                    binds.push(BindValue::Float(*min));
                    conditions.push(format!("{col}::double precision < ${}", binds.len()));
                }
                if let Some(max) = max {
                    binds.push(BindValue::Float(*max));
                    conditions.push(format!("{col}::double precision > ${}", binds.len()));
                }
                (
                    format!(
                        "SELECT COUNT(*)::bigint FROM {table} WHERE {col} IS NOT NULL AND ({})",
                        conditions.join(" OR ")
                    ),
                    binds,
                )
            }
            ValidationKind::Regex { pattern } => (
                format!(
                    "SELECT COUNT(*)::bigint FROM {table} \
                     WHERE {col} IS NOT NULL AND {col}::text !~ $1"
                ),
                vec![BindValue::Text(pattern.clone())],
            ),
            ValidationKind::AllowedValues { values } => (
                format!(
                    "SELECT COUNT(*)::bigint FROM {table} \
                     WHERE {col} IS NOT NULL AND NOT ({col}::text = ANY($1))"
                ),
                vec![BindValue::TextArray(values.clone())],
            ),
            ValidationKind::Unique => (
                format!(
                    "SELECT COALESCE(SUM(n - 1), 0)::bigint FROM \
                     (SELECT COUNT(*) AS n FROM {table} WHERE {col} IS NOT NULL \
                      GROUP BY {col} HAVING COUNT(*) > 1) dup"
                ),
                vec![],
            ),
        };
        Ok(CheckQuery { sql, binds })
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validation_id: DbId,
    pub table_name: String,
    pub column_name: String,
    pub validation_type: String,
    pub passed: bool,
    /// Violating row count; `None` when the check could not run.
    pub violations: Option<i64>,
    pub message: String,
}

impl ValidationResult {
    pub fn from_count(check: &ValidationCheck, violations: i64) -> Self {
        let passed = violations == 0;
        let message = if passed {
            "No violations".to_string()
        } else {
            format!("{violations} violating row(s)")
        };
        Self {
            validation_id: check.validation_id,
            table_name: check.table_name.clone(),
            column_name: check.column_name.clone(),
            validation_type: check.kind.as_str().to_string(),
            passed,
            violations: Some(violations),
            message,
        }
    }

    /// A check that could not be planned or run.
    pub fn errored(def: &ValidationDefinition, error: impl std::fmt::Display) -> Self {
        Self {
            validation_id: def.id,
            table_name: def.table_name.clone(),
            column_name: def.column_name.clone(),
            validation_type: def.validation_type.clone(),
            passed: false,
            violations: None,
            message: error.to_string(),
        }
    }
}

/// Ids of validations that did not pass, in result order.
pub fn failed_validation_ids(results: &[ValidationResult]) -> Vec<DbId> {
    results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.validation_id)
        .collect()
}
