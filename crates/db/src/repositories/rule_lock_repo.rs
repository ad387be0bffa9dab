//! Repository for the `rule_locks` table.
//!
//! Grant decisions come from [`brm_core::lock::check_acquire`]; this layer
//! applies them under a row lock so two acquirers cannot both win.

use brm_core::lock::{check_acquire, may_release, AcquireGrant, LockedError, RuleLock};
use brm_core::types::{DbId, Timestamp};
use chrono::Duration;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::lock::RuleLockRow;

const COLUMNS: &str = "rule_id, locked_by, acquired_at, expires_at, is_forced";

/// Result of an acquisition attempt that reached the database.
#[derive(Debug, Clone, PartialEq)]
pub enum LockAttempt {
    Granted { lock: RuleLock, grant: AcquireGrant },
    Denied(LockedError),
}

/// Provides lease operations over `rule_locks`.
pub struct RuleLockRepo;

impl RuleLockRepo {
    pub async fn find(pool: &PgPool, rule_id: DbId) -> Result<Option<RuleLock>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rule_locks WHERE rule_id = $1");
        let row = sqlx::query_as::<_, RuleLockRow>(&query)
            .bind(rule_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(RuleLock::from))
    }

    async fn find_for_update(
        tx: &mut Transaction<'_, Postgres>,
        rule_id: DbId,
    ) -> Result<Option<RuleLock>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rule_locks WHERE rule_id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, RuleLockRow>(&query)
            .bind(rule_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(RuleLock::from))
    }

    /// Acquire or renew a lease.
    ///
    /// An existing row is locked with `SELECT ... FOR UPDATE` before the
    /// decision. When no row exists the insert uses `ON CONFLICT DO NOTHING`;
    /// losing that race re-reads the winner's row and decides again.
    pub async fn acquire(
        pool: &PgPool,
        rule_id: DbId,
        holder: &str,
        ttl: Duration,
        force: bool,
        now: Timestamp,
    ) -> Result<LockAttempt, sqlx::Error> {
        let mut tx = pool.begin().await?;

        for _ in 0..2 {
            let existing = Self::find_for_update(&mut tx, rule_id).await?;
            let grant = match check_acquire(existing.as_ref(), rule_id, holder, force, now) {
                Ok(grant) => grant,
                Err(denied) => {
                    tx.rollback().await?;
                    return Ok(LockAttempt::Denied(denied));
                }
            };

            let forced = matches!(grant, AcquireGrant::Override { .. });
            let lease = RuleLock::lease(rule_id, holder, ttl, now, forced);

            let written = if existing.is_none() {
                let query = format!(
                    "INSERT INTO rule_locks ({COLUMNS}) VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (rule_id) DO NOTHING RETURNING rule_id"
                );
                sqlx::query_scalar::<_, DbId>(&query)
                    .bind(lease.rule_id)
                    .bind(&lease.locked_by)
                    .bind(lease.acquired_at)
                    .bind(lease.expires_at)
                    .bind(lease.is_forced)
                    .fetch_optional(&mut *tx)
                    .await?
                    .is_some()
            } else {
                sqlx::query(
                    "UPDATE rule_locks \
                     SET locked_by = $2, acquired_at = $3, expires_at = $4, is_forced = $5 \
                     WHERE rule_id = $1",
                )
                .bind(lease.rule_id)
                .bind(&lease.locked_by)
                .bind(lease.acquired_at)
                .bind(lease.expires_at)
                .bind(lease.is_forced)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                    > 0
            };

            if written {
                tx.commit().await?;
                return Ok(LockAttempt::Granted { lock: lease, grant });
            }
            tracing::debug!(rule_id, holder, "Lost lock insert race, re-reading");
        }

        tx.rollback().await?;
        Err(sqlx::Error::Protocol(format!(
            "Lock row for rule {rule_id} changed repeatedly during acquisition"
        )))
    }

    /// Delete the lock if `holder` owns it. Returns the removed lease.
    pub async fn release(
        pool: &PgPool,
        rule_id: DbId,
        holder: &str,
    ) -> Result<Option<RuleLock>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let existing = Self::find_for_update(&mut tx, rule_id).await?;
        if !may_release(existing.as_ref(), holder) {
            tx.rollback().await?;
            return Ok(None);
        }
        sqlx::query("DELETE FROM rule_locks WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(existing)
    }

    /// Delete the lock whoever holds it. Returns the removed lease.
    pub async fn force_release(
        pool: &PgPool,
        rule_id: DbId,
    ) -> Result<Option<RuleLock>, sqlx::Error> {
        let query = format!("DELETE FROM rule_locks WHERE rule_id = $1 RETURNING {COLUMNS}");
        let row = sqlx::query_as::<_, RuleLockRow>(&query)
            .bind(rule_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(RuleLock::from))
    }

    /// Whether a live lease held by someone other than `excluding_holder`
    /// exists. Expired rows count as absent.
    pub async fn is_locked(
        pool: &PgPool,
        rule_id: DbId,
        excluding_holder: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let lock = Self::find(pool, rule_id).await?;
        Ok(lock.is_some_and(|l| match excluding_holder {
            Some(holder) => l.blocks(holder, now),
            None => !l.is_expired(now),
        }))
    }

    /// Delete every expired row. Returns the number removed.
    pub async fn delete_expired(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM rule_locks WHERE expires_at <= $1")
            .bind(now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
