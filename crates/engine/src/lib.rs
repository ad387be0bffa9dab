//! Rule execution engine.
//!
//! [`RuleEngine`] is the in-process entry point used by the worker and the
//! CLI. It wires the [`TransactionalRuleRunner`], [`LockManager`] and
//! [`ValidationGate`] into a [`PgBackend`] and drives traversals through the
//! [`Orchestrator`].

pub mod backend;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod runner;
pub mod validation;

use std::sync::Arc;

use brm_core::config::EngineConfig;
use brm_core::graph::BuiltGraph;
use brm_core::outcome::Outcome;
use brm_core::types::DbId;
use brm_core::validation::ValidationResult;
use brm_db::DbPool;
use brm_events::EventBus;

pub use backend::{ExecutionBackend, GraphInputs, PgBackend, RunStart};
pub use error::{EngineError, EngineResult};
pub use locks::{LockClaim, LockManager};
pub use orchestrator::{Orchestrator, TraversalReport, TraversalRequest, TraversalStart};
pub use runner::{ExecutionError, TransactionalRuleRunner};
pub use validation::ValidationGate;

pub struct RuleEngine {
    orchestrator: Orchestrator<PgBackend>,
    events: Arc<EventBus>,
}

impl RuleEngine {
    pub fn new(pool: DbPool, config: EngineConfig, events: Arc<EventBus>) -> Self {
        let locks =
            LockManager::new(pool.clone(), config.lock_ttl()).with_events(Arc::clone(&events));
        let backend = PgBackend::new(pool, locks, config.statement_timeout_ms);
        Self {
            orchestrator: Orchestrator::new(backend, config).with_events(Arc::clone(&events)),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.orchestrator.config()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn pool(&self) -> &DbPool {
        self.orchestrator.backend().pool()
    }

    pub async fn build_graph(&self) -> EngineResult<BuiltGraph> {
        self.orchestrator.build_graph().await
    }

    pub async fn run_single_rule(&self, rule_id: DbId, dry_run: bool) -> EngineResult<Outcome> {
        self.orchestrator.run_single_rule(rule_id, dry_run).await
    }

    pub async fn run_traversal(&self, request: TraversalRequest) -> EngineResult<TraversalReport> {
        self.orchestrator.run_traversal(request).await
    }

    // -----------------------------------------------------------------------
    // Locks
    // -----------------------------------------------------------------------

    /// Acquire a lease for `holder`. `ttl` overrides the configured lease
    /// length for this call.
    pub async fn acquire_lock(
        &self,
        rule_id: DbId,
        holder: &str,
        force: bool,
        ttl: Option<chrono::Duration>,
    ) -> EngineResult<LockClaim> {
        self.locks().acquire(rule_id, holder, force, ttl).await
    }

    pub async fn release_lock(&self, rule_id: DbId, holder: &str) -> EngineResult<bool> {
        self.locks().release(rule_id, holder).await
    }

    pub async fn is_locked(
        &self,
        rule_id: DbId,
        excluding_holder: Option<&str>,
    ) -> EngineResult<bool> {
        self.locks().is_locked(rule_id, excluding_holder).await
    }

    pub async fn force_release(&self, rule_id: DbId, actor: &str) -> EngineResult<bool> {
        self.locks().force_release(rule_id, actor).await
    }

    /// Run the validation gate on its own, optionally limited to `tables`.
    pub async fn run_validations(
        &self,
        tables: Option<&[String]>,
    ) -> EngineResult<Vec<ValidationResult>> {
        self.orchestrator.backend().gate().run_validations(tables).await
    }

    fn locks(&self) -> &LockManager {
        self.orchestrator.backend().locks()
    }
}
