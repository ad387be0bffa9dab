use brm_core::audit::{actions, entities, AuditEntry};
use brm_db::models::rule::CreateRule;
use brm_db::models::schedule::schedule_status;
use brm_db::repositories::{AuditLogRepo, RuleRepo, ScheduleRepo};
use chrono::{Duration, SubsecRound, Utc};
use sqlx::PgPool;

fn stale() -> Duration {
    Duration::hours(1)
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn bootstrap_and_rule_round_trip(pool: PgPool) {
    brm_db::health_check(&pool).await.unwrap();

    let parent = RuleRepo::create(&pool, &CreateRule::sql("parent", "SELECT 1", "risk"))
        .await
        .unwrap();
    let child = RuleRepo::create(
        &pool,
        &CreateRule::sql("child", "SELECT 0", "risk").with_parent(parent.id),
    )
    .await
    .unwrap();

    assert_eq!(RuleRepo::list_root_ids(&pool).await.unwrap(), vec![parent.id]);
    let rule = child.into_rule().unwrap();
    assert_eq!(rule.parent_rule_id, Some(parent.id));
    assert!(rule.is_executable());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn logic_exclusivity_is_enforced_by_schema(pool: PgPool) {
    let mut input = CreateRule::sql("both", "SELECT 1", "risk");
    input.decision_table_id = Some(1);
    assert!(RuleRepo::create(&pool, &input).await.is_err());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn due_schedule_is_claimed_once(pool: PgPool) {
    let rule = RuleRepo::create(&pool, &CreateRule::sql("nightly", "SELECT 1", "ops"))
        .await
        .unwrap();
    let now = Utc::now().trunc_subsecs(6);
    ScheduleRepo::create(&pool, rule.id, now - Duration::minutes(1))
        .await
        .unwrap();
    ScheduleRepo::create(&pool, rule.id, now + Duration::hours(1))
        .await
        .unwrap();

    let claimed = ScheduleRepo::claim_due(&pool, now, stale()).await.unwrap().unwrap();
    assert_eq!(claimed.status, schedule_status::RUNNING);
    assert_eq!(claimed.claimed_at, Some(now));
    assert!(ScheduleRepo::claim_due(&pool, now, stale()).await.unwrap().is_none());

    ScheduleRepo::mark_finished(&pool, claimed.id, schedule_status::EXECUTED, None)
        .await
        .unwrap();
    let stored = ScheduleRepo::find(&pool, claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, schedule_status::EXECUTED);
    assert!(stored.executed_at.is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn schedule_abandoned_while_running_is_claimed_again(pool: PgPool) {
    let rule = RuleRepo::create(&pool, &CreateRule::sql("nightly", "SELECT 1", "ops"))
        .await
        .unwrap();
    let claimed_at = Utc::now().trunc_subsecs(6) - Duration::hours(2);
    ScheduleRepo::create(&pool, rule.id, claimed_at - Duration::minutes(1))
        .await
        .unwrap();
    let first = ScheduleRepo::claim_due(&pool, claimed_at, stale()).await.unwrap().unwrap();

    let before_window = claimed_at + stale() - Duration::seconds(1);
    assert!(ScheduleRepo::claim_due(&pool, before_window, stale()).await.unwrap().is_none());

    let now = claimed_at + stale() + Duration::seconds(1);
    let again = ScheduleRepo::claim_due(&pool, now, stale()).await.unwrap().unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.status, schedule_status::RUNNING);
    assert_eq!(again.claimed_at, Some(now));
    assert!(ScheduleRepo::claim_due(&pool, now, stale()).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failing_a_claimed_schedule_keeps_a_recorded_result(pool: PgPool) {
    let rule = RuleRepo::create(&pool, &CreateRule::sql("nightly", "SELECT 1", "ops"))
        .await
        .unwrap();
    let now = Utc::now();
    for _ in 0..2 {
        ScheduleRepo::create(&pool, rule.id, now - Duration::minutes(1))
            .await
            .unwrap();
    }
    let done = ScheduleRepo::claim_due(&pool, now, stale()).await.unwrap().unwrap();
    let stuck = ScheduleRepo::claim_due(&pool, now, stale()).await.unwrap().unwrap();
    ScheduleRepo::mark_finished(&pool, done.id, schedule_status::EXECUTED, None)
        .await
        .unwrap();

    assert!(!ScheduleRepo::fail_if_running(&pool, done.id).await.unwrap());
    assert!(ScheduleRepo::fail_if_running(&pool, stuck.id).await.unwrap());

    let done = ScheduleRepo::find(&pool, done.id).await.unwrap().unwrap();
    assert_eq!(done.status, schedule_status::EXECUTED);
    let stuck = ScheduleRepo::find(&pool, stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, schedule_status::FAILED);
    assert!(stuck.executed_at.is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn audit_entries_are_listed_per_entity(pool: PgPool) {
    let entry = AuditEntry::new(actions::LOCK_ACQUIRE, entities::RULE, Some(7), "alice")
        .with_new_state(serde_json::json!({"locked_by": "alice"}));
    AuditLogRepo::insert(&pool, &entry).await.unwrap();

    let rows = AuditLogRepo::list_for_entity(&pool, entities::RULE, 7).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].actor, "alice");
}
