//! Execution outcomes and the pass/fail classification of a rule's result.
//!
//! The store layer reduces whatever a statement produced to a
//! [`StatementResult`]; [`classify`] turns that into the pass flag, message,
//! and affected-row count recorded in an [`Outcome`].

use serde::{Deserialize, Serialize};

use crate::types::{DbId, RunId, Timestamp};

/// Terminal status of a rule within one traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TerminalStatus {
    Pass,
    Fail,
    Skip,
}

impl TerminalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalStatus::Pass => "PASS",
            TerminalStatus::Fail => "FAIL",
            TerminalStatus::Skip => "SKIP",
        }
    }
}

/// One rule execution. Append-only once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub rule_id: DbId,
    pub run_id: RunId,
    pub executed_at: Timestamp,
    pub passed: bool,
    pub message: String,
    pub affected_rows: i64,
    pub is_dry_run: bool,
    pub duration_ms: i64,
}

/// What executing a statement produced, reduced to the parts the pass rule
/// looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementResult {
    /// The statement returned a result set. `first_value` is the text of the
    /// first column of the first row (`None` for no rows or SQL NULL).
    Rows {
        first_value: Option<String>,
        row_count: i64,
    },
    /// The statement only mutated data.
    Mutation { rows_affected: i64 },
}

/// Pass flag, message and affected-row count for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub passed: bool,
    pub message: String,
    pub affected_rows: i64,
}

impl Classification {
    /// A failed execution carrying the error text.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            affected_rows: 0,
        }
    }
}

/// Apply the pass rule: a result set passes iff its first column of the
/// first row equals the integer `1`; a pure mutation always passes.
pub fn classify(result: &StatementResult) -> Classification {
    match result {
        StatementResult::Rows {
            first_value,
            row_count,
        } => {
            let (passed, message) = match first_value {
                Some(value) => (
                    is_passing_value(value),
                    format!("Query returned {value}"),
                ),
                None if *row_count == 0 => (false, "Query returned no rows".to_string()),
                None => (false, "Query returned NULL".to_string()),
            };
            Classification {
                passed,
                message,
                affected_rows: floor_row_count(*row_count),
            }
        }
        StatementResult::Mutation { rows_affected } => {
            let affected_rows = floor_row_count(*rows_affected);
            Classification {
                passed: true,
                message: format!("Statement affected {affected_rows} row(s)"),
                affected_rows,
            }
        }
    }
}

/// Whether a textual column value is numerically equal to one.
///
/// Integer and decimal renderings (`1`, `1.0`, `1.000`) pass; booleans,
/// strings and every other number do not.
pub fn is_passing_value(value: &str) -> bool {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return n == 1;
    }
    let is_decimal = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'));
    is_decimal && value.parse::<f64>().is_ok_and(|n| n == 1.0)
}

/// Stores may report negative counts for "unknown"; floor those at zero.
pub fn floor_row_count(count: i64) -> i64 {
    count.max(0)
}

/// Commit only live runs that passed; dry runs and failures roll back.
pub fn should_commit(dry_run: bool, passed: bool) -> bool {
    !dry_run && passed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(value: Option<&str>, row_count: i64) -> StatementResult {
        StatementResult::Rows {
            first_value: value.map(str::to_string),
            row_count,
        }
    }

    #[test]
    fn single_row_of_one_passes() {
        let c = classify(&rows(Some("1"), 1));
        assert!(c.passed);
        assert_eq!(c.affected_rows, 1);
        assert_eq!(c.message, "Query returned 1");
    }

    #[test]
    fn zero_fails_and_records_value() {
        let c = classify(&rows(Some("0"), 1));
        assert!(!c.passed);
        assert!(c.message.contains('0'));
    }

    #[test]
    fn affected_rows_counts_returned_rows() {
        let c = classify(&rows(Some("1"), 7));
        assert!(c.passed);
        assert_eq!(c.affected_rows, 7);
    }

    #[test]
    fn empty_result_set_fails() {
        let c = classify(&rows(None, 0));
        assert!(!c.passed);
        assert_eq!(c.message, "Query returned no rows");
    }

    #[test]
    fn null_first_column_fails() {
        let c = classify(&rows(None, 1));
        assert!(!c.passed);
        assert_eq!(c.message, "Query returned NULL");
    }

    #[test]
    fn mutation_always_passes_with_floored_count() {
        let c = classify(&StatementResult::Mutation { rows_affected: 12 });
        assert!(c.passed);
        assert_eq!(c.affected_rows, 12);

        let c = classify(&StatementResult::Mutation { rows_affected: -1 });
        assert!(c.passed);
        assert_eq!(c.affected_rows, 0);
    }

    #[test]
    fn passing_values() {
        for v in ["1", " 1 ", "1.0", "1.000", "+1", "01"] {
            assert!(is_passing_value(v), "{v:?} should pass");
        }
        for v in ["0", "2", "-1", "t", "true", "one", "", "1e0", "NaN", "inf", "1.5"] {
            assert!(!is_passing_value(v), "{v:?} should fail");
        }
    }

    #[test]
    fn commit_decision() {
        assert!(should_commit(false, true));
        assert!(!should_commit(true, true));
        assert!(!should_commit(false, false));
        assert!(!should_commit(true, false));
    }

    #[test]
    fn error_classification_is_failed() {
        let c = Classification::error("relation \"t\" does not exist");
        assert!(!c.passed);
        assert_eq!(c.affected_rows, 0);
    }
}
