//! Execution Orchestrator: drives the breadth-first traversal against an
//! [`ExecutionBackend`].
//!
//! The traversal decisions (dequeue order, conflict resolution, skip
//! propagation, composites) are made by [`brm_core::traversal::Traversal`].
//! This layer adds I/O around it:
//!
//! 1. build the graph and resolve the seeds,
//! 2. run pre-flight validations (unless skipped),
//! 3. for live runs, claim every reachable rule's lock up front,
//! 4. execute step by step, recording each outcome as it happens,
//! 5. release every claim on every exit path, then publish events and
//!    persist the run report.

use std::sync::Arc;
use std::time::Instant;

use brm_core::audit::{actions, entities, AuditEntry};
use brm_core::composite::CompositeEvaluation;
use brm_core::config::EngineConfig;
use brm_core::error::CoreError;
use brm_core::graph::{BuiltGraph, GraphBuilder, RuleGraph};
use brm_core::outcome::Outcome;
use brm_core::rule::Rule;
use brm_core::traversal::{
    reachable_rules, SkippedRule, Step, Traversal, TraversalOptions, TraversalSummary,
};
use brm_core::types::{DbId, RunId};
use brm_core::validation::{failed_validation_ids, ValidationResult};
use brm_events::{event_types, EngineEvent, EventBus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backend::{ExecutionBackend, RunStart};
use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// Where a traversal starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TraversalStart {
    Rules(Vec<DbId>),
    /// Members of a custom rule group.
    Group(DbId),
    AllRoots,
}

#[derive(Debug, Clone)]
pub struct TraversalRequest {
    pub start: TraversalStart,
    pub dry_run: bool,
    pub skip_validations: bool,
    /// Checked between steps only; never interrupts a running rule.
    pub cancel: Option<CancellationToken>,
    /// Lock holder and audit actor. Defaults to the configured holder.
    pub actor: Option<String>,
}

impl TraversalRequest {
    pub fn new(start: TraversalStart, dry_run: bool) -> Self {
        Self {
            start,
            dry_run,
            skip_validations: false,
            cancel: None,
            actor: None,
        }
    }

    pub fn skip_validations(mut self, skip: bool) -> Self {
        self.skip_validations = skip;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Everything a traversal did. Every rule that reached a terminal state
/// appears in exactly one of `executed`, `failed` or `skipped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalReport {
    pub run_id: RunId,
    pub dry_run: bool,
    pub seeds: Vec<DbId>,
    pub executed: Vec<DbId>,
    pub failed: Vec<DbId>,
    pub skipped: Vec<SkippedRule>,
    pub outcomes: Vec<Outcome>,
    pub validation_results: Vec<ValidationResult>,
    pub failed_validation_ids: Vec<DbId>,
    pub composites: Vec<CompositeEvaluation>,
    /// Relations dropped while building the graph.
    pub graph_warnings: Vec<String>,
    pub cancelled: bool,
}

impl TraversalReport {
    pub fn skipped_ids(&self) -> Vec<DbId> {
        self.skipped.iter().map(|s| s.rule_id).collect()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<B> {
    backend: B,
    config: EngineConfig,
    events: Option<Arc<EventBus>>,
}

impl<B: ExecutionBackend> Orchestrator<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load rules and relations and build the graph under the configured
    /// edge policy.
    pub async fn build_graph(&self) -> EngineResult<BuiltGraph> {
        let inputs = self.backend.load_graph_inputs().await?;
        let built = GraphBuilder::new(self.config.edge_policy).build(
            inputs.rules,
            &inputs.conflicts,
            &inputs.critical_links,
            &inputs.composites,
        )?;
        for warning in &built.skipped {
            tracing::warn!(error = %warning, "Skipped relation while building graph");
        }
        tracing::debug!(
            rules = built.graph.len(),
            roots = built.graph.roots().len(),
            composites = built.graph.composites().len(),
            "Rule graph built"
        );
        Ok(built)
    }

    /// Run one rule outside any traversal. A live run holds the rule's lock
    /// for the duration of the call.
    pub async fn run_single_rule(&self, rule_id: DbId, dry_run: bool) -> EngineResult<Outcome> {
        let rule = self
            .backend
            .load_rule(rule_id)
            .await?
            .ok_or(CoreError::NotFound { entity: "rule", id: rule_id })?;
        if self.config.require_approved && !rule.is_executable() {
            return Err(CoreError::Validation(format!(
                "Rule {rule_id} has status {} and cannot be executed",
                rule.status
            ))
            .into());
        }

        let holder = self.config.lock_holder.as_str();
        let claimed = if dry_run {
            false
        } else {
            !self.backend.claim_lock(rule_id, holder).await?.was_held()
        };

        let run_id = RunId::now_v7();
        let result = self.execute_and_record(&rule, run_id, dry_run).await;
        if claimed {
            self.release_claims(&[rule_id], holder).await;
        }
        let outcome = result?;

        let entry = AuditEntry::new(actions::RULE_RUN, entities::RULE, Some(rule_id), holder)
            .with_new_state(serde_json::json!({
                "run_id": run_id,
                "dry_run": dry_run,
                "passed": outcome.passed,
                "message": outcome.message,
            }));
        self.backend.audit(&entry).await?;
        Ok(outcome)
    }

    /// Run a breadth-first traversal.
    ///
    /// Fails before executing anything on graph load errors, unknown seeds,
    /// lock conflicts (live runs), or failed validations when configured to
    /// abort on them. Rule failures never fail the call.
    pub async fn run_traversal(&self, request: TraversalRequest) -> EngineResult<TraversalReport> {
        let run_id = RunId::now_v7();
        let holder = request
            .actor
            .clone()
            .unwrap_or_else(|| self.config.lock_holder.clone());

        let BuiltGraph { graph, skipped } = self.build_graph().await?;
        let graph_warnings: Vec<String> = skipped.iter().map(ToString::to_string).collect();
        let seeds = self.resolve_seeds(&request.start, &graph).await?;
        let options = TraversalOptions {
            require_approved: self.config.require_approved,
        };
        let traversal = Traversal::new(&graph, &seeds, options)?;

        let validation_results = if request.skip_validations {
            Vec::new()
        } else {
            self.backend.run_validations().await?
        };
        let failed_validations = failed_validation_ids(&validation_results);
        if !failed_validations.is_empty() {
            tracing::warn!(%run_id, failed = ?failed_validations, "Pre-flight validations failed");
            if self.config.abort_on_validation_failure {
                return Err(EngineError::ValidationGate {
                    failed: failed_validations,
                    results: validation_results,
                });
            }
        }

        let claims = if request.dry_run {
            Vec::new()
        } else {
            self.claim_all(&reachable_rules(&graph, &seeds), &holder).await?
        };

        tracing::info!(
            %run_id,
            dry_run = request.dry_run,
            seeds = ?seeds,
            holder = %holder,
            "Traversal started"
        );
        let run = RunStart {
            run_id,
            started_by: holder.clone(),
            dry_run: request.dry_run,
            seeds: seeds.clone(),
            started_at: Utc::now(),
        };
        let result = self.drive(&graph, traversal, &run, request.cancel.as_ref()).await;
        self.release_claims(&claims, &holder).await;
        let (summary, outcomes, cancelled) = result?;

        for skip in &summary.skipped {
            tracing::info!(%run_id, rule_id = skip.rule_id, reason = %skip.reason, "Rule skipped");
        }

        let report = TraversalReport {
            run_id,
            dry_run: request.dry_run,
            seeds,
            executed: summary.executed,
            failed: summary.failed,
            skipped: summary.skipped,
            outcomes,
            validation_results,
            failed_validation_ids: failed_validations,
            composites: summary.composites,
            graph_warnings,
            cancelled,
        };
        self.complete(&report, &holder).await?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn resolve_seeds(
        &self,
        start: &TraversalStart,
        graph: &RuleGraph,
    ) -> EngineResult<Vec<DbId>> {
        match start {
            TraversalStart::Rules(ids) => Ok(ids.clone()),
            TraversalStart::Group(group_id) => self
                .backend
                .group_members(*group_id)
                .await?
                .ok_or_else(|| {
                    CoreError::NotFound {
                        entity: "rule_group",
                        id: *group_id,
                    }
                    .into()
                }),
            TraversalStart::AllRoots => Ok(graph.roots().to_vec()),
        }
    }

    /// Claim every rule in `rule_ids`. Returns the rules this call newly
    /// claimed; leases the holder already had are left alone. On a lock
    /// conflict the partial claim is released before returning the error.
    async fn claim_all(&self, rule_ids: &[DbId], holder: &str) -> EngineResult<Vec<DbId>> {
        let mut claimed = Vec::with_capacity(rule_ids.len());
        for &rule_id in rule_ids {
            match self.backend.claim_lock(rule_id, holder).await {
                Ok(claim) => {
                    if !claim.was_held() {
                        claimed.push(rule_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        rule_id,
                        holder,
                        error = %e,
                        "Pre-claim failed, aborting traversal"
                    );
                    self.release_claims(&claimed, holder).await;
                    return Err(e);
                }
            }
        }
        Ok(claimed)
    }

    /// Release errors are logged, never returned, so they cannot mask the
    /// result of the run.
    async fn release_claims(&self, rule_ids: &[DbId], holder: &str) {
        for &rule_id in rule_ids {
            if let Err(e) = self.backend.release_lock(rule_id, holder).await {
                tracing::error!(rule_id, holder, error = %e, "Failed to release lock");
            }
        }
    }

    async fn drive(
        &self,
        graph: &RuleGraph,
        mut traversal: Traversal<'_>,
        run: &RunStart,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<(TraversalSummary, Vec<Outcome>, bool)> {
        self.backend.start_run(run).await?;

        let mut outcomes = Vec::new();
        let mut cancelled = false;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                let dropped = traversal.cancel();
                tracing::info!(
                    run_id = %run.run_id,
                    remaining = dropped.len(),
                    "Traversal cancelled"
                );
                cancelled = true;
                break;
            }

            let rule_id = match traversal.next_step() {
                Step::Execute(rule_id) => rule_id,
                Step::Done => break,
            };
            let rule = graph
                .rule(rule_id)
                .ok_or_else(|| CoreError::Internal(format!("Rule {rule_id} missing from graph")))?;

            let outcome = self.execute_and_record(rule, run.run_id, run.dry_run).await?;
            let recorded = traversal.record(rule_id, outcome.passed)?;
            for target in recorded.settled_critical_targets {
                tracing::debug!(
                    run_id = %run.run_id,
                    source = rule_id,
                    target,
                    "Global-critical target already finished, left as is"
                );
            }
            outcomes.push(outcome);
        }

        Ok((traversal.finish(), outcomes, cancelled))
    }

    async fn execute_and_record(
        &self,
        rule: &Rule,
        run_id: RunId,
        dry_run: bool,
    ) -> EngineResult<Outcome> {
        let executed_at = Utc::now();
        let started = Instant::now();
        let classification = self.backend.execute_rule(rule, dry_run).await;
        let outcome = Outcome {
            rule_id: rule.id,
            run_id,
            executed_at,
            passed: classification.passed,
            message: classification.message,
            affected_rows: classification.affected_rows,
            is_dry_run: dry_run,
            duration_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
        };

        if outcome.passed {
            tracing::info!(
                %run_id,
                rule_id = rule.id,
                dry_run,
                affected_rows = outcome.affected_rows,
                duration_ms = outcome.duration_ms,
                "Rule passed"
            );
        } else {
            tracing::warn!(
                %run_id,
                rule_id = rule.id,
                dry_run,
                message = %outcome.message,
                "Rule failed"
            );
            self.publish(
                EngineEvent::new(event_types::RULE_FAILED)
                    .with_rule(rule.id)
                    .with_run(run_id)
                    .with_payload(serde_json::json!({
                        "message": outcome.message,
                        "dry_run": dry_run,
                    })),
            );
        }

        self.backend.record_outcome(&outcome).await?;
        Ok(outcome)
    }

    /// Publish completion events, then persist the report and audit entry.
    async fn complete(&self, report: &TraversalReport, actor: &str) -> EngineResult<()> {
        for composite in report.composites.iter().filter(|c| c.triggered) {
            tracing::info!(
                run_id = %report.run_id,
                composite_id = composite.composite_id,
                action = ?composite.action,
                "Composite triggered"
            );
            self.publish(
                EngineEvent::new(event_types::COMPOSITE_TRIGGERED)
                    .with_run(report.run_id)
                    .with_payload(serde_json::json!({
                        "composite_id": composite.composite_id,
                        "name": composite.name,
                        "expression": composite.expression,
                        "action": composite.action,
                    })),
            );
        }

        let counts = serde_json::json!({
            "dry_run": report.dry_run,
            "executed": report.executed.len(),
            "failed": report.failed.len(),
            "skipped": report.skipped.len(),
            "cancelled": report.cancelled,
        });
        self.publish(
            EngineEvent::new(event_types::TRAVERSAL_COMPLETED)
                .with_run(report.run_id)
                .with_payload(counts.clone()),
        );
        tracing::info!(
            run_id = %report.run_id,
            executed = report.executed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            cancelled = report.cancelled,
            "Traversal finished"
        );

        let json = serde_json::to_value(report)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize report: {e}")))?;
        self.backend.finish_run(report.run_id, &json).await?;

        let mut state = counts;
        state["run_id"] = serde_json::json!(report.run_id);
        let entry = AuditEntry::new(actions::TRAVERSAL_RUN, entities::TRAVERSAL, None, actor)
            .with_new_state(state);
        self.backend.audit(&entry).await
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
