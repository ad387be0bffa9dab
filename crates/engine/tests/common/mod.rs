//! In-memory [`ExecutionBackend`] for driving the orchestrator without a
//! database.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use brm_core::audit::AuditEntry;
use brm_core::composite::CompositeDefinition;
use brm_core::config::EngineConfig;
use brm_core::error::CoreError;
use brm_core::graph::{ConflictLink, CriticalLink};
use brm_core::lock::{AcquireGrant, LockToken, LockedError};
use brm_core::outcome::{Classification, Outcome};
use brm_core::rule::{OperationType, Rule, RuleStatus};
use brm_core::types::{DbId, RunId};
use brm_core::validation::ValidationResult;
use brm_engine::{
    EngineError, EngineResult, ExecutionBackend, GraphInputs, LockClaim, Orchestrator, RunStart,
};
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

pub const HOLDER: &str = "brm-engine";

pub fn rule(id: DbId, parent: Option<DbId>) -> Rule {
    Rule {
        id,
        name: format!("rule {id}"),
        operation_type: OperationType::Sql,
        rule_sql: Some("SELECT 1".to_string()),
        decision_table_id: None,
        parent_rule_id: parent,
        status: RuleStatus::Active,
        is_critical: false,
        is_global: false,
        owner_group: "risk".to_string(),
    }
}

pub fn validation(id: DbId, passed: bool) -> ValidationResult {
    ValidationResult {
        validation_id: id,
        table_name: "exposures".to_string(),
        column_name: "amount".to_string(),
        validation_type: "NOT_NULL".to_string(),
        passed,
        violations: Some(if passed { 0 } else { 3 }),
        message: if passed { "No violations" } else { "3 violating row(s)" }.to_string(),
    }
}

#[derive(Default)]
pub struct FakeState {
    pub inputs: GraphInputs,
    pub groups: HashMap<DbId, Vec<DbId>>,
    pub failing: HashSet<DbId>,
    pub validations: Vec<ValidationResult>,
    /// rule id -> holder
    pub locks: BTreeMap<DbId, String>,
    pub executed: Vec<(DbId, bool)>,
    pub outcomes: Vec<Outcome>,
    pub runs_started: Vec<RunStart>,
    pub runs_finished: Vec<(RunId, serde_json::Value)>,
    pub audits: Vec<AuditEntry>,
    /// Cancel this token once this many rules have executed.
    pub cancel_after: Option<(usize, CancellationToken)>,
    /// Fail `record_outcome` once this many outcomes are stored.
    pub fail_record_after: Option<usize>,
}

#[derive(Default)]
pub struct FakeBackend {
    pub state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.state.lock().unwrap().inputs.rules.extend(rules);
        self
    }

    pub fn failing(self, ids: &[DbId]) -> Self {
        self.state.lock().unwrap().failing.extend(ids);
        self
    }

    /// Symmetric conflict with a priority for each side.
    pub fn conflict(self, a: (DbId, i32), b: (DbId, i32)) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.inputs.conflicts.push(ConflictLink {
                rule_id: a.0,
                conflict_rule_id: b.0,
                priority: a.1,
            });
            state.inputs.conflicts.push(ConflictLink {
                rule_id: b.0,
                conflict_rule_id: a.0,
                priority: b.1,
            });
        }
        self
    }

    pub fn critical(self, source: DbId, target: DbId) -> Self {
        self.state.lock().unwrap().inputs.critical_links.push(CriticalLink {
            source_rule_id: source,
            target_rule_id: target,
        });
        self
    }

    pub fn composite(self, id: DbId, expr: &str, action: Option<&str>) -> Self {
        self.state.lock().unwrap().inputs.composites.push(CompositeDefinition {
            id,
            name: format!("composite {id}"),
            logic_expr: expr.to_string(),
            action_on_pass: action.map(str::to_string),
        });
        self
    }

    pub fn group(self, id: DbId, members: &[DbId]) -> Self {
        self.state.lock().unwrap().groups.insert(id, members.to_vec());
        self
    }

    pub fn validations(self, results: Vec<ValidationResult>) -> Self {
        self.state.lock().unwrap().validations = results;
        self
    }

    pub fn locked_by(self, rule_id: DbId, holder: &str) -> Self {
        self.state.lock().unwrap().locks.insert(rule_id, holder.to_string());
        self
    }

    pub fn cancel_after(self, executions: usize, token: CancellationToken) -> Self {
        self.state.lock().unwrap().cancel_after = Some((executions, token));
        self
    }

    pub fn fail_record_after(self, outcomes: usize) -> Self {
        self.state.lock().unwrap().fail_record_after = Some(outcomes);
        self
    }

    pub fn executed_ids(&self) -> Vec<DbId> {
        self.state.lock().unwrap().executed.iter().map(|(id, _)| *id).collect()
    }

    pub fn locks(&self) -> BTreeMap<DbId, String> {
        self.state.lock().unwrap().locks.clone()
    }
}

impl ExecutionBackend for FakeBackend {
    async fn load_graph_inputs(&self) -> EngineResult<GraphInputs> {
        Ok(self.state.lock().unwrap().inputs.clone())
    }

    async fn load_rule(&self, rule_id: DbId) -> EngineResult<Option<Rule>> {
        let state = self.state.lock().unwrap();
        Ok(state.inputs.rules.iter().find(|r| r.id == rule_id).cloned())
    }

    async fn group_members(&self, group_id: DbId) -> EngineResult<Option<Vec<DbId>>> {
        Ok(self.state.lock().unwrap().groups.get(&group_id).cloned())
    }

    async fn execute_rule(&self, rule: &Rule, _dry_run: bool) -> Classification {
        let mut state = self.state.lock().unwrap();
        let passed = !state.failing.contains(&rule.id);
        state.executed.push((rule.id, passed));
        if let Some((after, token)) = &state.cancel_after {
            if state.executed.len() >= *after {
                token.cancel();
            }
        }
        if passed {
            Classification {
                passed: true,
                message: "Query returned 1".to_string(),
                affected_rows: 1,
            }
        } else {
            Classification {
                passed: false,
                message: "Query returned 0".to_string(),
                affected_rows: 1,
            }
        }
    }

    async fn record_outcome(&self, outcome: &Outcome) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_record_after.is_some_and(|n| state.outcomes.len() >= n) {
            return Err(CoreError::Internal("outcome log unavailable".to_string()).into());
        }
        state.outcomes.push(outcome.clone());
        Ok(())
    }

    async fn claim_lock(&self, rule_id: DbId, holder: &str) -> EngineResult<LockClaim> {
        let mut state = self.state.lock().unwrap();
        let expires_at = Utc::now() + Duration::minutes(30);
        let grant = match state.locks.get(&rule_id) {
            Some(current) if current == holder => AcquireGrant::Renewal,
            Some(current) => {
                return Err(EngineError::from(LockedError {
                    rule_id,
                    held_by: current.clone(),
                    expires_at,
                }))
            }
            None => AcquireGrant::Fresh,
        };
        state.locks.insert(rule_id, holder.to_string());
        Ok(LockClaim {
            token: LockToken {
                rule_id,
                holder: holder.to_string(),
                expires_at,
                forced: false,
            },
            grant,
        })
    }

    async fn release_lock(&self, rule_id: DbId, holder: &str) -> EngineResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.locks.get(&rule_id).is_some_and(|h| h == holder) {
            state.locks.remove(&rule_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn run_validations(&self) -> EngineResult<Vec<ValidationResult>> {
        Ok(self.state.lock().unwrap().validations.clone())
    }

    async fn start_run(&self, run: &RunStart) -> EngineResult<()> {
        self.state.lock().unwrap().runs_started.push(run.clone());
        Ok(())
    }

    async fn finish_run(&self, run_id: RunId, report: &serde_json::Value) -> EngineResult<()> {
        self.state
            .lock()
            .unwrap()
            .runs_finished
            .push((run_id, report.clone()));
        Ok(())
    }

    async fn audit(&self, entry: &AuditEntry) -> EngineResult<()> {
        self.state.lock().unwrap().audits.push(entry.clone());
        Ok(())
    }
}

pub fn orchestrator(backend: FakeBackend) -> Orchestrator<FakeBackend> {
    Orchestrator::new(backend, EngineConfig::default())
}
