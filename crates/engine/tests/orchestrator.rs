mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use brm_core::audit::actions;
use brm_core::config::EngineConfig;
use brm_core::error::CoreError;
use brm_core::graph::{EdgePolicy, GraphLoadError};
use brm_core::rule::RuleStatus;
use brm_core::traversal::{SkipReason, SkippedRule};
use brm_engine::{EngineError, Orchestrator, TraversalRequest, TraversalStart};
use brm_events::{event_types, EventBus};
use tokio_util::sync::CancellationToken;

use common::{orchestrator, rule, validation, FakeBackend, HOLDER};

fn live(ids: &[i64]) -> TraversalRequest {
    TraversalRequest::new(TraversalStart::Rules(ids.to_vec()), false)
}

fn dry(ids: &[i64]) -> TraversalRequest {
    TraversalRequest::new(TraversalStart::Rules(ids.to_vec()), true)
}

// ---------------------------------------------------------------------------
// Traversal semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn passing_parent_and_child_both_execute() {
    let engine = orchestrator(FakeBackend::new().with_rules([rule(1, None), rule(2, Some(1))]));

    let report = engine.run_traversal(live(&[1])).await.unwrap();

    assert_eq!(report.executed, vec![1, 2]);
    assert!(report.failed.is_empty());
    assert!(report.skipped.is_empty());
    assert_eq!(report.outcomes.len(), 2);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn failing_parent_skips_child_and_is_recorded_failed() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, Some(1))])
            .failing(&[1]),
    );

    let report = engine.run_traversal(live(&[1])).await.unwrap();

    assert!(report.executed.is_empty());
    assert_eq!(report.failed, vec![1]);
    assert_eq!(report.skipped_ids(), vec![2]);
    assert_eq!(engine.backend().executed_ids(), vec![1]);
}

#[tokio::test]
async fn failure_skips_every_descendant_without_running_them() {
    // 1 -> {2, 3}, 2 -> 4
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, Some(1)), rule(3, Some(1)), rule(4, Some(2))])
            .failing(&[1]),
    );

    let report = engine.run_traversal(dry(&[1])).await.unwrap();

    let mut skipped = report.skipped_ids();
    skipped.sort_unstable();
    assert_eq!(skipped, vec![2, 3, 4]);
    assert!(report
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::AncestorFailed { ancestor: 1 }));
    assert_eq!(engine.backend().executed_ids(), vec![1]);
}

#[tokio::test]
async fn global_critical_target_is_skipped_when_source_fails() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(5, None), rule(6, Some(5))])
            .critical(1, 5)
            .failing(&[1]),
    );

    let report = engine
        .run_traversal(TraversalRequest::new(TraversalStart::AllRoots, true))
        .await
        .unwrap();

    assert_eq!(report.failed, vec![1]);
    assert!(report.skipped.contains(&SkippedRule {
        rule_id: 5,
        reason: SkipReason::GlobalCritical { source: 1 },
    }));
    assert!(!engine.backend().executed_ids().contains(&5));
    assert!(!engine.backend().executed_ids().contains(&6));
}

#[tokio::test]
async fn lower_priority_value_wins_conflict() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, None), rule(3, Some(1))])
            .conflict((1, 2), (2, 1)),
    );

    let report = engine.run_traversal(dry(&[1, 2])).await.unwrap();

    assert_eq!(report.executed, vec![2]);
    assert_eq!(
        report.skipped,
        vec![SkippedRule {
            rule_id: 1,
            reason: SkipReason::Conflict { winner: 2 },
        }]
    );
    assert_eq!(engine.backend().executed_ids(), vec![2]);
}

#[tokio::test]
async fn unapproved_rule_is_skipped_not_executed() {
    let mut draft = rule(2, Some(1));
    draft.status = RuleStatus::Draft;
    let engine = orchestrator(FakeBackend::new().with_rules([rule(1, None), draft]));

    let report = engine.run_traversal(dry(&[1])).await.unwrap();

    assert_eq!(report.executed, vec![1]);
    assert_eq!(
        report.skipped,
        vec![SkippedRule {
            rule_id: 2,
            reason: SkipReason::NotExecutable {
                status: RuleStatus::Draft
            },
        }]
    );
}

#[tokio::test]
async fn repeated_runs_are_identical() {
    let backend = || {
        FakeBackend::new()
            .with_rules([
                rule(1, None),
                rule(2, None),
                rule(3, Some(1)),
                rule(4, Some(1)),
                rule(5, Some(2)),
                rule(6, Some(3)),
            ])
            .conflict((4, 1), (5, 3))
            .critical(3, 2)
            .failing(&[3])
    };

    let first = orchestrator(backend()).run_traversal(dry(&[2, 1])).await.unwrap();
    let second = orchestrator(backend()).run_traversal(dry(&[1, 2])).await.unwrap();

    assert_eq!(first.executed, second.executed);
    assert_eq!(first.failed, second.failed);
    assert_eq!(first.skipped, second.skipped);
    assert_eq!(first.seeds, vec![2, 1]);
}

// ---------------------------------------------------------------------------
// Seeds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn group_members_seed_the_traversal() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, None), rule(3, Some(2))])
            .group(7, &[2]),
    );

    let report = engine
        .run_traversal(TraversalRequest::new(TraversalStart::Group(7), true))
        .await
        .unwrap();

    assert_eq!(report.executed, vec![2, 3]);
}

#[tokio::test]
async fn missing_group_is_not_found() {
    let engine = orchestrator(FakeBackend::new().with_rules([rule(1, None)]));

    let err = engine
        .run_traversal(TraversalRequest::new(TraversalStart::Group(99), true))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        EngineError::Core(CoreError::NotFound { entity: "rule_group", id: 99 })
    );
}

#[tokio::test]
async fn unknown_seed_fails_before_anything_runs() {
    let engine = orchestrator(FakeBackend::new().with_rules([rule(1, None)]));

    let err = engine.run_traversal(live(&[1, 42])).await.unwrap_err();

    assert_matches!(err, EngineError::Core(CoreError::NotFound { entity: "rule", id: 42 }));
    assert!(engine.backend().executed_ids().is_empty());
    assert!(engine.backend().locks().is_empty());
}

// ---------------------------------------------------------------------------
// Graph load policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dangling_relation_aborts_under_default_policy() {
    let engine = orchestrator(FakeBackend::new().with_rules([rule(1, None)]).critical(1, 77));

    let err = engine.run_traversal(dry(&[1])).await.unwrap_err();

    assert_matches!(
        err,
        EngineError::Core(CoreError::GraphLoad(GraphLoadError::MissingRule { missing_id: 77, .. }))
    );
}

#[tokio::test]
async fn dangling_relation_is_reported_under_skip_edge_policy() {
    let config = EngineConfig {
        edge_policy: EdgePolicy::SkipEdge,
        ..EngineConfig::default()
    };
    let engine = Orchestrator::new(
        FakeBackend::new().with_rules([rule(1, None)]).critical(1, 77),
        config,
    );

    let report = engine.run_traversal(dry(&[1])).await.unwrap();

    assert_eq!(report.executed, vec![1]);
    assert_eq!(report.graph_warnings.len(), 1);
    assert!(report.graph_warnings[0].contains("77"));
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_run_releases_every_claim() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, Some(1)), rule(3, None)])
            .failing(&[3]),
    );

    let report = engine.run_traversal(live(&[1, 3])).await.unwrap();

    assert_eq!(report.executed, vec![1, 2]);
    assert_eq!(report.failed, vec![3]);
    assert!(engine.backend().locks().is_empty());
}

#[tokio::test]
async fn locked_rule_aborts_live_run_before_anything_executes() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, Some(1)), rule(3, Some(1))])
            .locked_by(2, "alice"),
    );

    let err = engine.run_traversal(live(&[1])).await.unwrap_err();

    let locked = err.as_locked().expect("lock conflict");
    assert_eq!(locked.rule_id, 2);
    assert_eq!(locked.held_by, "alice");
    assert!(engine.backend().executed_ids().is_empty());
    assert_eq!(
        engine.backend().locks().into_iter().collect::<Vec<_>>(),
        vec![(2, "alice".to_string())]
    );
}

#[tokio::test]
async fn dry_run_ignores_locks() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, Some(1))])
            .locked_by(2, "alice"),
    );

    let report = engine.run_traversal(dry(&[1])).await.unwrap();

    assert_eq!(report.executed, vec![1, 2]);
    assert_eq!(engine.backend().locks().len(), 1);
}

#[tokio::test]
async fn holders_existing_lease_survives_the_run() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, Some(1))])
            .locked_by(1, HOLDER),
    );

    engine.run_traversal(live(&[1])).await.unwrap();

    assert_eq!(
        engine.backend().locks().into_iter().collect::<Vec<_>>(),
        vec![(1, HOLDER.to_string())]
    );
}

#[tokio::test]
async fn outcome_log_failure_aborts_and_releases_claims() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, Some(1)), rule(3, Some(2))])
            .fail_record_after(1),
    );

    let err = engine.run_traversal(live(&[1])).await.unwrap_err();

    assert_matches!(err, EngineError::Core(CoreError::Internal(_)));
    assert_eq!(engine.backend().executed_ids(), vec![1, 2]);
    assert!(engine.backend().locks().is_empty());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_takes_effect_between_steps() {
    let token = CancellationToken::new();
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None), rule(2, None), rule(3, None)])
            .cancel_after(1, token.clone()),
    );

    let report = engine
        .run_traversal(live(&[1, 2, 3]).with_cancel(token))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.executed, vec![1]);
    assert_eq!(
        report.skipped,
        vec![
            SkippedRule { rule_id: 2, reason: SkipReason::Cancelled },
            SkippedRule { rule_id: 3, reason: SkipReason::Cancelled },
        ]
    );
    assert!(engine.backend().locks().is_empty());
}

#[tokio::test]
async fn pre_cancelled_run_executes_nothing() {
    let token = CancellationToken::new();
    token.cancel();
    let engine = orchestrator(FakeBackend::new().with_rules([rule(1, None)]));

    let report = engine.run_traversal(live(&[1]).with_cancel(token)).await.unwrap();

    assert!(report.cancelled);
    assert!(report.executed.is_empty());
    assert_eq!(report.skipped_ids(), vec![1]);
}

// ---------------------------------------------------------------------------
// Validation gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_validations_are_reported_but_do_not_block_by_default() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None)])
            .validations(vec![validation(10, true), validation(11, false)]),
    );

    let report = engine.run_traversal(dry(&[1])).await.unwrap();

    assert_eq!(report.executed, vec![1]);
    assert_eq!(report.validation_results.len(), 2);
    assert_eq!(report.failed_validation_ids, vec![11]);
}

#[tokio::test]
async fn failed_validations_abort_when_configured() {
    let config = EngineConfig {
        abort_on_validation_failure: true,
        ..EngineConfig::default()
    };
    let engine = Orchestrator::new(
        FakeBackend::new()
            .with_rules([rule(1, None)])
            .validations(vec![validation(11, false)]),
        config,
    );

    let err = engine.run_traversal(live(&[1])).await.unwrap_err();

    assert_matches!(err, EngineError::ValidationGate { ref failed, .. } if failed == &vec![11]);
    assert!(engine.backend().executed_ids().is_empty());
    assert!(engine.backend().locks().is_empty());
}

#[tokio::test]
async fn skipped_validations_are_not_run() {
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(1, None)])
            .validations(vec![validation(11, false)]),
    );

    let report = engine
        .run_traversal(dry(&[1]).skip_validations(true))
        .await
        .unwrap();

    assert!(report.validation_results.is_empty());
    assert!(report.failed_validation_ids.is_empty());
}

// ---------------------------------------------------------------------------
// Composites, events, persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn composites_and_events_are_published() {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let engine = orchestrator(
        FakeBackend::new()
            .with_rules([rule(10, None), rule(20, None), rule(30, None)])
            .failing(&[30])
            .composite(1, "Rule10==PASS AND Rule20==PASS", Some("notify-risk"))
            .composite(2, "30==PASS", Some("never")),
    )
    .with_events(Arc::clone(&bus));

    let report = engine.run_traversal(dry(&[10, 20, 30])).await.unwrap();

    assert_eq!(report.composites.len(), 2);
    let triggered: Vec<_> = report.composites.iter().filter(|c| c.triggered).collect();
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].action.as_deref(), Some("notify-risk"));

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            event_types::RULE_FAILED,
            event_types::COMPOSITE_TRIGGERED,
            event_types::TRAVERSAL_COMPLETED,
        ]
    );
    assert_eq!(events[0].rule_id, Some(30));
    assert_eq!(events[1].payload["action"], "notify-risk");
    assert!(events.iter().all(|e| e.run_id == Some(report.run_id)));
}

#[tokio::test]
async fn run_report_and_audit_are_persisted() {
    let engine = orchestrator(FakeBackend::new().with_rules([rule(1, None)]));

    let report = engine
        .run_traversal(live(&[1]).with_actor("nightly"))
        .await
        .unwrap();

    let state = engine.backend().state.lock().unwrap();
    assert_eq!(state.runs_started.len(), 1);
    assert_eq!(state.runs_started[0].started_by, "nightly");
    assert!(!state.runs_started[0].dry_run);
    assert_eq!(state.runs_finished.len(), 1);
    let (run_id, stored) = &state.runs_finished[0];
    assert_eq!(*run_id, report.run_id);
    assert_eq!(stored["executed"], serde_json::json!([1]));
    assert_eq!(state.outcomes.len(), 1);
    assert!(state.outcomes.iter().all(|o| o.run_id == report.run_id));
    assert_matches!(
        state.audits.last(),
        Some(entry) if entry.action == actions::TRAVERSAL_RUN && entry.actor == "nightly"
    );
}

// ---------------------------------------------------------------------------
// Single rule
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_live_run_claims_and_releases() {
    let engine = orchestrator(FakeBackend::new().with_rules([rule(4, None)]));

    let outcome = engine.run_single_rule(4, false).await.unwrap();

    assert!(outcome.passed);
    assert!(!outcome.is_dry_run);
    assert!(engine.backend().locks().is_empty());
    let state = engine.backend().state.lock().unwrap();
    assert_eq!(state.outcomes, vec![outcome.clone()]);
    assert_matches!(state.audits.last(), Some(entry) if entry.action == actions::RULE_RUN);
}

#[tokio::test]
async fn single_run_on_locked_rule_is_refused() {
    let engine = orchestrator(FakeBackend::new().with_rules([rule(4, None)]).locked_by(4, "alice"));

    let err = engine.run_single_rule(4, false).await.unwrap_err();

    assert!(err.as_locked().is_some());
    assert!(engine.backend().executed_ids().is_empty());

    let dry_outcome = engine.run_single_rule(4, true).await.unwrap();
    assert!(dry_outcome.is_dry_run);
}

#[tokio::test]
async fn single_run_rejects_unapproved_rule() {
    let mut draft = rule(4, None);
    draft.status = RuleStatus::UnderApproval;
    let engine = orchestrator(FakeBackend::new().with_rules([draft]));

    let err = engine.run_single_rule(4, true).await.unwrap_err();

    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
    assert_matches!(
        engine.run_single_rule(5, true).await,
        Err(EngineError::Core(CoreError::NotFound { entity: "rule", id: 5 }))
    );
}
