//! The seam between the orchestrator and the rule store.
//!
//! [`PgBackend`] is the production implementation. Tests drive the
//! orchestrator through an in-memory implementation instead.

use std::time::Duration;

use brm_core::audit::AuditEntry;
use brm_core::composite::CompositeDefinition;
use brm_core::graph::{ConflictLink, CriticalLink};
use brm_core::outcome::{Classification, Outcome};
use brm_core::rule::Rule;
use brm_core::types::{DbId, RunId, Timestamp};
use brm_core::validation::ValidationResult;
use brm_db::repositories::{
    AuditLogRepo, ExecutionOutcomeRepo, RelationRepo, RuleRepo, TraversalRunRepo,
};
use sqlx::PgPool;

use crate::error::{EngineError, EngineResult};
use crate::locks::{LockClaim, LockManager};
use crate::runner::TransactionalRuleRunner;
use crate::validation::ValidationGate;

/// Everything the graph builder needs, as loaded from the store.
#[derive(Debug, Clone, Default)]
pub struct GraphInputs {
    pub rules: Vec<Rule>,
    pub conflicts: Vec<ConflictLink>,
    pub critical_links: Vec<CriticalLink>,
    pub composites: Vec<CompositeDefinition>,
}

/// Store operations the orchestrator depends on.
pub trait ExecutionBackend: Send + Sync {
    fn load_graph_inputs(
        &self,
    ) -> impl std::future::Future<Output = EngineResult<GraphInputs>> + Send;

    fn load_rule(
        &self,
        rule_id: DbId,
    ) -> impl std::future::Future<Output = EngineResult<Option<Rule>>> + Send;

    /// Member rule ids of a custom group; `None` when the group does not exist.
    fn group_members(
        &self,
        group_id: DbId,
    ) -> impl std::future::Future<Output = EngineResult<Option<Vec<DbId>>>> + Send;

    /// Run one rule in its own transaction. Never fails; errors become a
    /// failed classification.
    fn execute_rule(
        &self,
        rule: &Rule,
        dry_run: bool,
    ) -> impl std::future::Future<Output = Classification> + Send;

    fn record_outcome(
        &self,
        outcome: &Outcome,
    ) -> impl std::future::Future<Output = EngineResult<()>> + Send;

    fn claim_lock(
        &self,
        rule_id: DbId,
        holder: &str,
    ) -> impl std::future::Future<Output = EngineResult<LockClaim>> + Send;

    fn release_lock(
        &self,
        rule_id: DbId,
        holder: &str,
    ) -> impl std::future::Future<Output = EngineResult<bool>> + Send;

    fn run_validations(
        &self,
    ) -> impl std::future::Future<Output = EngineResult<Vec<ValidationResult>>> + Send;

    fn start_run(
        &self,
        run: &RunStart,
    ) -> impl std::future::Future<Output = EngineResult<()>> + Send;

    fn finish_run(
        &self,
        run_id: RunId,
        report: &serde_json::Value,
    ) -> impl std::future::Future<Output = EngineResult<()>> + Send;

    fn audit(
        &self,
        entry: &AuditEntry,
    ) -> impl std::future::Future<Output = EngineResult<()>> + Send;
}

/// Header row written when a traversal starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStart {
    pub run_id: RunId,
    pub started_by: String,
    pub dry_run: bool,
    pub seeds: Vec<DbId>,
    pub started_at: Timestamp,
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
    runner: TransactionalRuleRunner,
    locks: LockManager,
    gate: ValidationGate,
}

impl PgBackend {
    pub fn new(pool: PgPool, locks: LockManager, statement_timeout_ms: u64) -> Self {
        Self {
            runner: TransactionalRuleRunner::new(pool.clone())
                .with_statement_timeout(Duration::from_millis(statement_timeout_ms)),
            gate: ValidationGate::new(pool.clone()),
            locks,
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn gate(&self) -> &ValidationGate {
        &self.gate
    }
}

impl ExecutionBackend for PgBackend {
    async fn load_graph_inputs(&self) -> EngineResult<GraphInputs> {
        let rules = RuleRepo::list_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_rule())
            .collect::<Result<Vec<_>, _>>()?;
        let conflicts = RelationRepo::list_conflicts(&self.pool).await?;
        let critical_links = RelationRepo::list_critical_links(&self.pool).await?;
        let composites = RelationRepo::list_composites(&self.pool).await?;

        Ok(GraphInputs {
            rules,
            conflicts: conflicts.into_iter().map(Into::into).collect(),
            critical_links: critical_links.into_iter().map(Into::into).collect(),
            composites: composites.into_iter().map(Into::into).collect(),
        })
    }

    async fn load_rule(&self, rule_id: DbId) -> EngineResult<Option<Rule>> {
        match RuleRepo::find_by_id(&self.pool, rule_id).await? {
            Some(row) => Ok(Some(row.into_rule()?)),
            None => Ok(None),
        }
    }

    async fn group_members(&self, group_id: DbId) -> EngineResult<Option<Vec<DbId>>> {
        if RuleRepo::find_group(&self.pool, group_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(RuleRepo::list_group_member_ids(&self.pool, group_id).await?))
    }

    async fn execute_rule(&self, rule: &Rule, dry_run: bool) -> Classification {
        self.runner.run(rule, dry_run).await
    }

    async fn record_outcome(&self, outcome: &Outcome) -> EngineResult<()> {
        ExecutionOutcomeRepo::insert(&self.pool, outcome).await?;
        Ok(())
    }

    async fn claim_lock(&self, rule_id: DbId, holder: &str) -> EngineResult<LockClaim> {
        self.locks.acquire(rule_id, holder, false, None).await
    }

    async fn release_lock(&self, rule_id: DbId, holder: &str) -> EngineResult<bool> {
        self.locks.release(rule_id, holder).await
    }

    async fn run_validations(&self) -> EngineResult<Vec<ValidationResult>> {
        self.gate.run_validations(None).await
    }

    async fn start_run(&self, run: &RunStart) -> EngineResult<()> {
        TraversalRunRepo::start(
            &self.pool,
            run.run_id,
            &run.started_by,
            run.dry_run,
            &run.seeds,
            run.started_at,
        )
        .await
        .map_err(EngineError::from)
    }

    async fn finish_run(&self, run_id: RunId, report: &serde_json::Value) -> EngineResult<()> {
        TraversalRunRepo::finish(&self.pool, run_id, report).await?;
        Ok(())
    }

    async fn audit(&self, entry: &AuditEntry) -> EngineResult<()> {
        AuditLogRepo::insert(&self.pool, entry).await?;
        Ok(())
    }
}
