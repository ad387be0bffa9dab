//! Composite rule expressions: pure logic, no database access.
//!
//! A composite is a boolean expression over other rules' terminal statuses
//! in one traversal, e.g. `Rule10==PASS AND (Rule20==PASS OR NOT 30==FAIL)`.
//!
//! Grammar (keywords case-insensitive):
//!
//! ```text
//! expr    := and ( ("OR" | "||") and )*
//! and     := unary ( ("AND" | "&&") unary )*
//! unary   := ("NOT" | "!") unary | primary
//! primary := "(" expr ")" | "TRUE" | "FALSE" | ref ( ("==" | "=" | "!=") status )?
//! ref     := ["Rule" | "Rule_" | "R"] digits
//! status  := "PASS" | "FAIL" | "SKIP"
//! ```
//!
//! A bare reference means `==PASS`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::outcome::TerminalStatus;
use crate::types::DbId;

/// Parse failure with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Const(bool),
    Check {
        rule_id: DbId,
        status: TerminalStatus,
        negated: bool,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A parsed composite expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeExpr {
    source: String,
    root: Expr,
}

impl CompositeExpr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: source.len(),
        };
        let root = parser.parse_or()?;
        if let Some((tok, offset)) = parser.peek() {
            return Err(ExprError {
                message: format!("Unexpected token {tok:?}"),
                offset,
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every rule id the expression mentions, ascending.
    pub fn referenced_rules(&self) -> BTreeSet<DbId> {
        let mut ids = BTreeSet::new();
        collect_refs(&self.root, &mut ids);
        ids
    }

    /// Evaluate against a status lookup. Returns `None` when any referenced
    /// rule has no terminal status (the expression is never partially
    /// evaluated).
    pub fn evaluate<F>(&self, status_of: F) -> Option<bool>
    where
        F: Fn(DbId) -> Option<TerminalStatus>,
    {
        if self
            .referenced_rules()
            .into_iter()
            .any(|id| status_of(id).is_none())
        {
            return None;
        }
        Some(eval(&self.root, &status_of))
    }
}

fn collect_refs(expr: &Expr, ids: &mut BTreeSet<DbId>) {
    match expr {
        Expr::Const(_) => {}
        Expr::Check { rule_id, .. } => {
            ids.insert(*rule_id);
        }
        Expr::Not(inner) => collect_refs(inner, ids),
        Expr::And(a, b) | Expr::Or(a, b) => {
            collect_refs(a, ids);
            collect_refs(b, ids);
        }
    }
}

fn eval<F>(expr: &Expr, status_of: &F) -> bool
where
    F: Fn(DbId) -> Option<TerminalStatus>,
{
    match expr {
        Expr::Const(value) => *value,
        Expr::Check {
            rule_id,
            status,
            negated,
        } => (status_of(*rule_id) == Some(*status)) != *negated,
        Expr::Not(inner) => !eval(inner, status_of),
        Expr::And(a, b) => eval(a, status_of) && eval(b, status_of),
        Expr::Or(a, b) => eval(a, status_of) || eval(b, status_of),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Eq,
    NotEq,
    AndOp,
    OrOp,
    Bang,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let token = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b'=' => {
                i += if bytes.get(i + 1) == Some(&b'=') { 2 } else { 1 };
                Token::Eq
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                Token::NotEq
            }
            b'!' => {
                i += 1;
                Token::Bang
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                i += 2;
                Token::AndOp
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                i += 2;
                Token::OrOp
            }
            c if c.is_ascii_alphanumeric() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                Token::Word(source[start..i].to_string())
            }
            _ => {
                let ch = source[i..].chars().next().unwrap_or('?');
                return Err(ExprError {
                    message: format!("Unexpected character '{ch}'"),
                    offset: i,
                });
            }
        };
        tokens.push((token, start));
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [(Token, usize)],
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<(&'a Token, usize)> {
        self.tokens.get(self.pos).map(|(t, o)| (t, *o))
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |(_, o)| o)
    }

    fn bump(&mut self) -> Option<(&'a Token, usize)> {
        let tok = self.tokens.get(self.pos).map(|(t, o)| (t, *o));
        self.pos += 1;
        tok
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some((Token::Word(w), _)) if w.eq_ignore_ascii_case(keyword))
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.at_keyword("OR") || matches!(self.peek(), Some((Token::OrOp, _))) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        while self.at_keyword("AND") || matches!(self.peek(), Some((Token::AndOp, _))) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.at_keyword("NOT") || matches!(self.peek(), Some((Token::Bang, _))) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.bump() {
            Some((Token::LParen, _)) => {
                let inner = self.parse_or()?;
                match self.bump() {
                    Some((Token::RParen, _)) => Ok(inner),
                    _ => Err(ExprError {
                        message: "Expected ')'".to_string(),
                        offset: self.offset().min(self.end),
                    }),
                }
            }
            Some((Token::Word(word), _)) => {
                let word = word.clone();
                if word.eq_ignore_ascii_case("TRUE") {
                    return Ok(Expr::Const(true));
                }
                if word.eq_ignore_ascii_case("FALSE") {
                    return Ok(Expr::Const(false));
                }
                let rule_id = parse_rule_ref(&word).ok_or_else(|| ExprError {
                    message: format!("Expected a rule reference, found '{word}'"),
                    offset,
                })?;
                self.parse_comparison(rule_id)
            }
            Some((tok, at)) => Err(ExprError {
                message: format!("Unexpected token {tok:?}"),
                offset: at,
            }),
            None => Err(ExprError {
                message: "Unexpected end of expression".to_string(),
                offset: self.end,
            }),
        }
    }

    fn parse_comparison(&mut self, rule_id: DbId) -> Result<Expr, ExprError> {
        let negated = match self.peek() {
            Some((Token::Eq, _)) => false,
            Some((Token::NotEq, _)) => true,
            _ => {
                return Ok(Expr::Check {
                    rule_id,
                    status: TerminalStatus::Pass,
                    negated: false,
                })
            }
        };
        self.pos += 1;
        let offset = self.offset();
        let status = match self.bump() {
            Some((Token::Word(w), _)) => parse_status(w),
            _ => None,
        }
        .ok_or_else(|| ExprError {
            message: "Expected PASS, FAIL or SKIP".to_string(),
            offset,
        })?;
        Ok(Expr::Check {
            rule_id,
            status,
            negated,
        })
    }
}

fn parse_status(word: &str) -> Option<TerminalStatus> {
    match word.to_ascii_uppercase().as_str() {
        "PASS" | "PASSED" => Some(TerminalStatus::Pass),
        "FAIL" | "FAILED" => Some(TerminalStatus::Fail),
        "SKIP" | "SKIPPED" => Some(TerminalStatus::Skip),
        _ => None,
    }
}

fn parse_rule_ref(word: &str) -> Option<DbId> {
    let split = word.find(|c: char| c.is_ascii_digit())?;
    let (prefix, digits) = word.split_at(split);
    let prefix_ok = matches!(
        prefix.to_ascii_uppercase().as_str(),
        "" | "RULE" | "RULE_" | "R"
    );
    if !prefix_ok || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// Composite rules
// ---------------------------------------------------------------------------

/// Raw composite definition as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeDefinition {
    pub id: DbId,
    pub name: String,
    pub logic_expr: String,
    pub action_on_pass: Option<String>,
}

/// A composite whose expression has been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeRule {
    pub id: DbId,
    pub name: String,
    pub expression: CompositeExpr,
    pub action_on_pass: Option<String>,
}

impl CompositeRule {
    pub fn from_definition(def: &CompositeDefinition) -> Result<Self, ExprError> {
        Ok(Self {
            id: def.id,
            name: def.name.clone(),
            expression: CompositeExpr::parse(&def.logic_expr)?,
            action_on_pass: def
                .action_on_pass
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        })
    }

    /// Evaluate once all referenced rules are terminal; `None` otherwise.
    pub fn evaluate<F>(&self, status_of: F) -> Option<CompositeEvaluation>
    where
        F: Fn(DbId) -> Option<TerminalStatus>,
    {
        let result = self.expression.evaluate(status_of)?;
        Some(CompositeEvaluation {
            composite_id: self.id,
            name: self.name.clone(),
            expression: self.expression.source().to_string(),
            result,
            action: self.action_on_pass.clone(),
            triggered: result && self.action_on_pass.is_some(),
        })
    }
}

/// Result of evaluating one composite in a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeEvaluation {
    pub composite_id: DbId,
    pub name: String,
    pub expression: String,
    pub result: bool,
    pub action: Option<String>,
    /// True when the expression held and an action is configured.
    pub triggered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn statuses(pairs: &[(DbId, TerminalStatus)]) -> HashMap<DbId, TerminalStatus> {
        pairs.iter().copied().collect()
    }

    fn eval_with(expr: &str, pairs: &[(DbId, TerminalStatus)]) -> Option<bool> {
        let map = statuses(pairs);
        CompositeExpr::parse(expr)
            .unwrap()
            .evaluate(|id| map.get(&id).copied())
    }

    #[test]
    fn and_of_passes() {
        let expr = "Rule10==PASS AND Rule20==PASS";
        assert_eq!(
            eval_with(expr, &[(10, TerminalStatus::Pass), (20, TerminalStatus::Pass)]),
            Some(true)
        );
        assert_eq!(
            eval_with(expr, &[(10, TerminalStatus::Pass), (20, TerminalStatus::Fail)]),
            Some(false)
        );
    }

    #[test]
    fn referenced_rules_are_collected() {
        let expr = CompositeExpr::parse("R1 && (rule_2 == FAIL || NOT 3 != skip)").unwrap();
        assert_eq!(expr.referenced_rules().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn bare_reference_means_pass() {
        assert_eq!(eval_with("Rule7", &[(7, TerminalStatus::Pass)]), Some(true));
        assert_eq!(eval_with("Rule7", &[(7, TerminalStatus::Skip)]), Some(false));
    }

    #[test]
    fn skipped_rule_is_neither_pass_nor_fail() {
        let skipped = [(5, TerminalStatus::Skip)];
        assert_eq!(eval_with("Rule5==PASS", &skipped), Some(false));
        assert_eq!(eval_with("Rule5==FAIL", &skipped), Some(false));
        assert_eq!(eval_with("Rule5==SKIP", &skipped), Some(true));
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        // true OR (false AND false)
        let pairs = [
            (1, TerminalStatus::Pass),
            (2, TerminalStatus::Fail),
            (3, TerminalStatus::Fail),
        ];
        assert_eq!(eval_with("1 OR 2 AND 3", &pairs), Some(true));
        assert_eq!(eval_with("(1 OR 2) AND 3", &pairs), Some(false));
    }

    #[test]
    fn not_and_inequality() {
        let pairs = [(4, TerminalStatus::Fail)];
        assert_eq!(eval_with("NOT Rule4==PASS", &pairs), Some(true));
        assert_eq!(eval_with("!Rule4", &pairs), Some(true));
        assert_eq!(eval_with("Rule4 != FAIL", &pairs), Some(false));
    }

    #[test]
    fn constants() {
        assert_eq!(eval_with("TRUE", &[]), Some(true));
        assert_eq!(eval_with("false or true", &[]), Some(true));
    }

    #[test]
    fn missing_status_is_not_evaluated() {
        assert_eq!(eval_with("Rule1 AND Rule2", &[(1, TerminalStatus::Pass)]), None);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let expr = CompositeExpr::parse("Rule1==PASS AND NOT Rule2==FAIL").unwrap();
        let map = statuses(&[(1, TerminalStatus::Pass), (2, TerminalStatus::Skip)]);
        let first = expr.evaluate(|id| map.get(&id).copied());
        for _ in 0..10 {
            assert_eq!(expr.evaluate(|id| map.get(&id).copied()), first);
        }
        assert_eq!(first, Some(true));
    }

    #[test]
    fn parse_errors_carry_offsets() {
        let err = CompositeExpr::parse("Rule1 AND").unwrap_err();
        assert!(err.message.contains("end of expression"));
        assert_eq!(err.offset, 9);

        let err = CompositeExpr::parse("Rule1 == MAYBE").unwrap_err();
        assert!(err.message.contains("PASS, FAIL or SKIP"));
        assert_eq!(err.offset, 9);

        assert!(CompositeExpr::parse("(Rule1").is_err());
        assert!(CompositeExpr::parse("Rule1 Rule2").is_err());
        assert!(CompositeExpr::parse("Rule1 ; DROP").is_err());
        assert!(CompositeExpr::parse("Policy12").is_err());
    }

    #[test]
    fn composite_triggers_only_with_action() {
        let def = CompositeDefinition {
            id: 1,
            name: "exposure pair".to_string(),
            logic_expr: "Rule10==PASS AND Rule20==PASS".to_string(),
            action_on_pass: Some("NOTIFY:risk-ops".to_string()),
        };
        let composite = CompositeRule::from_definition(&def).unwrap();
        let map = statuses(&[(10, TerminalStatus::Pass), (20, TerminalStatus::Pass)]);
        let evaluation = composite.evaluate(|id| map.get(&id).copied()).unwrap();
        assert!(evaluation.result);
        assert!(evaluation.triggered);
        assert_eq!(evaluation.action.as_deref(), Some("NOTIFY:risk-ops"));

        let silent = CompositeRule::from_definition(&CompositeDefinition {
            action_on_pass: Some("  ".to_string()),
            ..def
        })
        .unwrap();
        let evaluation = silent.evaluate(|id| map.get(&id).copied()).unwrap();
        assert!(evaluation.result);
        assert!(!evaluation.triggered);
    }
}
