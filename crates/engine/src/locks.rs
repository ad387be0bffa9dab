//! Lock Manager: advisory per-rule leases with expiry and forced override.
//!
//! Grant decisions live in [`brm_core::lock`]; persistence and row locking in
//! [`RuleLockRepo`]. This layer adds audit entries and the `lock.forced`
//! event.

use std::sync::Arc;

use brm_core::audit::{actions, entities, lock_state, AuditEntry};
use brm_core::error::CoreError;
use brm_core::lock::{validate_lock_duration, AcquireGrant, LockToken, RuleLock};
use brm_core::types::DbId;
use brm_db::repositories::{AuditLogRepo, LockAttempt, RuleLockRepo};
use brm_events::{event_types, EngineEvent, EventBus};
use chrono::Utc;
use sqlx::PgPool;

use crate::error::EngineResult;

/// A granted lease and how it was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockClaim {
    pub token: LockToken,
    pub grant: AcquireGrant,
}

impl LockClaim {
    /// Whether the holder already had this lease before the call.
    pub fn was_held(&self) -> bool {
        self.grant == AcquireGrant::Renewal
    }
}

#[derive(Clone)]
pub struct LockManager {
    pool: PgPool,
    ttl: chrono::Duration,
    events: Option<Arc<EventBus>>,
}

impl LockManager {
    pub fn new(pool: PgPool, ttl: chrono::Duration) -> Self {
        Self {
            pool,
            ttl,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Acquire or renew the lease on `rule_id` for `holder`.
    ///
    /// The lease lasts `ttl` when given, else the configured default; a
    /// length outside the allowed minutes is a validation error. Fails with
    /// `LockedError` when someone else holds a live lease and `force` is
    /// false. Expired leases are reclaimed in place.
    pub async fn acquire(
        &self,
        rule_id: DbId,
        holder: &str,
        force: bool,
        ttl: Option<chrono::Duration>,
    ) -> EngineResult<LockClaim> {
        let ttl = match ttl {
            Some(ttl) => {
                validate_lock_duration(ttl.num_minutes()).map_err(CoreError::Validation)?;
                ttl
            }
            None => self.ttl,
        };
        let attempt =
            RuleLockRepo::acquire(&self.pool, rule_id, holder, ttl, force, Utc::now()).await?;
        let (lock, grant) = match attempt {
            LockAttempt::Granted { lock, grant } => (lock, grant),
            LockAttempt::Denied(denied) => {
                tracing::debug!(
                    rule_id,
                    holder,
                    held_by = %denied.held_by,
                    expires_at = %denied.expires_at,
                    "Lock denied"
                );
                return Err(denied.into());
            }
        };

        let old_state = match &grant {
            AcquireGrant::ReclaimExpired { previous_holder }
            | AcquireGrant::Override { previous_holder } => {
                Some(serde_json::json!({ "locked_by": previous_holder }))
            }
            AcquireGrant::Fresh | AcquireGrant::Renewal => None,
        };
        let mut entry =
            AuditEntry::new(actions::LOCK_ACQUIRE, entities::RULE, Some(rule_id), holder)
                .with_new_state(lock_state(&lock));
        if let Some(old) = old_state {
            entry = entry.with_old_state(old);
        }
        AuditLogRepo::insert(&self.pool, &entry).await?;

        if let AcquireGrant::Override { previous_holder } = &grant {
            tracing::info!(
                rule_id,
                holder,
                previous_holder = %previous_holder,
                "Lock overridden by force"
            );
            self.publish(
                EngineEvent::new(event_types::LOCK_FORCED)
                    .with_rule(rule_id)
                    .with_payload(serde_json::json!({
                        "actor": holder,
                        "previous_holder": previous_holder,
                        "operation": "acquire",
                    })),
            );
        } else {
            tracing::debug!(
                rule_id,
                holder,
                grant = ?grant,
                expires_at = %lock.expires_at,
                "Lock granted"
            );
        }

        Ok(LockClaim {
            token: LockToken::from(&lock),
            grant,
        })
    }

    /// Release `holder`'s lease. A no-op when there is no lease or someone
    /// else holds it. Returns whether a row was removed.
    pub async fn release(&self, rule_id: DbId, holder: &str) -> EngineResult<bool> {
        let Some(released) = RuleLockRepo::release(&self.pool, rule_id, holder).await? else {
            tracing::debug!(rule_id, holder, "Nothing to release");
            return Ok(false);
        };
        self.audit_removal(actions::LOCK_RELEASE, &released, holder).await?;
        tracing::debug!(rule_id, holder, "Lock released");
        Ok(true)
    }

    /// Whether a live lease exists, ignoring one held by `excluding_holder`.
    pub async fn is_locked(
        &self,
        rule_id: DbId,
        excluding_holder: Option<&str>,
    ) -> EngineResult<bool> {
        Ok(RuleLockRepo::is_locked(&self.pool, rule_id, excluding_holder, Utc::now()).await?)
    }

    /// Clear the lease whoever holds it. Authorization is the caller's job.
    pub async fn force_release(&self, rule_id: DbId, actor: &str) -> EngineResult<bool> {
        let Some(released) = RuleLockRepo::force_release(&self.pool, rule_id).await? else {
            return Ok(false);
        };
        self.audit_removal(actions::LOCK_FORCE_RELEASE, &released, actor).await?;
        tracing::info!(
            rule_id,
            actor,
            previous_holder = %released.locked_by,
            "Lock force-released"
        );
        self.publish(
            EngineEvent::new(event_types::LOCK_FORCED)
                .with_rule(rule_id)
                .with_payload(serde_json::json!({
                    "actor": actor,
                    "previous_holder": released.locked_by,
                    "operation": "release",
                })),
        );
        Ok(true)
    }

    async fn audit_removal(
        &self,
        action: &str,
        released: &RuleLock,
        actor: &str,
    ) -> EngineResult<()> {
        let entry = AuditEntry::new(action, entities::RULE, Some(released.rule_id), actor)
            .with_old_state(lock_state(released));
        AuditLogRepo::insert(&self.pool, &entry).await?;
        Ok(())
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
