//! Scheduled rule execution.
//!
//! Polls `rule_schedules` for due rows, claims them one at a time with
//! `FOR UPDATE SKIP LOCKED`, runs a live traversal seeded with the
//! scheduled rule, and records `Executed` when that rule ended up in the
//! traversal's `executed` list and `Failed` otherwise. Rows left `Running`
//! past the configured staleness window are claimed again.

use std::sync::Arc;
use std::time::Duration;

use brm_core::audit::{actions, entities, AuditEntry};
use brm_core::types::DbId;
use brm_db::models::schedule::{schedule_status, RuleSchedule};
use brm_db::repositories::{AuditLogRepo, ScheduleRepo};
use brm_engine::{EngineResult, RuleEngine, TraversalReport, TraversalRequest, TraversalStart};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Actor recorded for schedule-initiated work.
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// The terminal schedule status for a traversal result.
pub fn status_for(rule_id: DbId, result: &EngineResult<TraversalReport>) -> &'static str {
    match result {
        Ok(report) if report.executed.contains(&rule_id) => schedule_status::EXECUTED,
        _ => schedule_status::FAILED,
    }
}

pub struct Scheduler {
    engine: Arc<RuleEngine>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<RuleEngine>, poll_interval: Duration) -> Self {
        Self {
            engine,
            poll_interval,
        }
    }

    /// Poll until `cancel` fires. A traversal in progress finishes its
    /// current rule before the loop exits.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "Scheduler started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.drain_due(&cancel).await {
                        Ok(0) => tracing::debug!("No schedules due"),
                        Ok(processed) => tracing::info!(processed, "Processed due schedules"),
                        Err(e) => tracing::error!(error = %e, "Scheduler poll failed"),
                    }
                }
            }
        }
    }

    /// Process due schedules until none are left. Returns how many ran.
    ///
    /// A schedule whose result cannot be recorded is moved to `Failed` on a
    /// best-effort basis and draining continues with the next one.
    pub async fn drain_due(&self, cancel: &CancellationToken) -> Result<usize, sqlx::Error> {
        let pool = self.engine.pool();
        let stale_after = self.engine.config().schedule_stale_after();
        let mut processed = 0;
        while !cancel.is_cancelled() {
            let Some(schedule) = ScheduleRepo::claim_due(pool, Utc::now(), stale_after).await?
            else {
                break;
            };
            if let Err(e) = self.execute(&schedule, cancel).await {
                tracing::error!(
                    schedule_id = schedule.id,
                    rule_id = schedule.rule_id,
                    error = %e,
                    "Failed to record scheduled run"
                );
                if let Err(e) = ScheduleRepo::fail_if_running(pool, schedule.id).await {
                    tracing::error!(
                        schedule_id = schedule.id,
                        error = %e,
                        "Could not mark schedule failed; it is retried once stale"
                    );
                }
            }
            processed += 1;
        }
        Ok(processed)
    }

    async fn execute(
        &self,
        schedule: &RuleSchedule,
        cancel: &CancellationToken,
    ) -> Result<(), sqlx::Error> {
        tracing::info!(
            schedule_id = schedule.id,
            rule_id = schedule.rule_id,
            "Running scheduled rule"
        );

        let request = TraversalRequest::new(TraversalStart::Rules(vec![schedule.rule_id]), false)
            .with_cancel(cancel.child_token());
        let result = self.engine.run_traversal(request).await;
        let status = status_for(schedule.rule_id, &result);
        let run_id = result.as_ref().ok().map(|report| report.run_id);

        match &result {
            Ok(report) => tracing::info!(
                schedule_id = schedule.id,
                rule_id = schedule.rule_id,
                run_id = %report.run_id,
                status,
                "Scheduled traversal finished"
            ),
            Err(e) => tracing::warn!(
                schedule_id = schedule.id,
                rule_id = schedule.rule_id,
                error = %e,
                "Scheduled traversal could not run"
            ),
        }

        ScheduleRepo::mark_finished(self.engine.pool(), schedule.id, status, run_id).await?;

        let mut new_state = serde_json::json!({
            "status": status,
            "rule_id": schedule.rule_id,
            "run_id": run_id,
        });
        if let Err(e) = &result {
            new_state["error"] = serde_json::json!(e.to_string());
        }
        let entry = AuditEntry::new(
            actions::SCHEDULE_EXECUTE,
            entities::SCHEDULE,
            Some(schedule.id),
            SCHEDULER_ACTOR,
        )
        .with_old_state(serde_json::json!({ "status": schedule.status }))
        .with_new_state(new_state);
        AuditLogRepo::insert(self.engine.pool(), &entry).await?;
        Ok(())
    }
}
