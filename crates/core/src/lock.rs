//! Rule lock leases: durations, lease records, and the grant/deny decision.
//!
//! Locks are advisory. At most one lock row exists per rule; an expired row
//! is treated as absent and is reclaimed by the next acquisition. The store
//! layer applies [`check_acquire`] inside a row-locking transaction.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Lock duration constants
// ---------------------------------------------------------------------------

/// Default lease length in minutes (30 minutes).
pub const DEFAULT_LOCK_DURATION_MINS: i64 = 30;

/// Maximum allowed lease length in minutes (4 hours).
pub const MAX_LOCK_DURATION_MINS: i64 = 240;

/// Minimum lease length in minutes.
pub const MIN_LOCK_DURATION_MINS: i64 = 1;

/// How often the worker sweeps expired lock rows (in seconds).
pub const LOCK_SWEEP_INTERVAL_SECS: u64 = 60;

/// Validate a lease length in minutes. Returns `Ok(())` or an error message.
pub fn validate_lock_duration(minutes: i64) -> Result<(), String> {
    if minutes < MIN_LOCK_DURATION_MINS {
        return Err(format!(
            "Lock duration must be at least {MIN_LOCK_DURATION_MINS} minute(s), got {minutes}"
        ));
    }
    if minutes > MAX_LOCK_DURATION_MINS {
        return Err(format!(
            "Lock duration must be at most {MAX_LOCK_DURATION_MINS} minutes, got {minutes}"
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lease records
// ---------------------------------------------------------------------------

/// A lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleLock {
    pub rule_id: DbId,
    pub locked_by: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
    pub is_forced: bool,
}

impl RuleLock {
    /// Build a new lease starting at `now`.
    pub fn lease(rule_id: DbId, holder: &str, ttl: Duration, now: Timestamp, forced: bool) -> Self {
        Self {
            rule_id,
            locked_by: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
            is_forced: forced,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Whether this lock prevents `holder` from acquiring or executing.
    pub fn blocks(&self, holder: &str, now: Timestamp) -> bool {
        !self.is_expired(now) && self.locked_by != holder
    }
}

/// Proof of a granted lease, handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub rule_id: DbId,
    pub holder: String,
    pub expires_at: Timestamp,
    pub forced: bool,
}

impl From<&RuleLock> for LockToken {
    fn from(lock: &RuleLock) -> Self {
        Self {
            rule_id: lock.rule_id,
            holder: lock.locked_by.clone(),
            expires_at: lock.expires_at,
            forced: lock.is_forced,
        }
    }
}

/// An active lease held by someone else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Rule {rule_id} is locked by {held_by} until {expires_at}")]
pub struct LockedError {
    pub rule_id: DbId,
    pub held_by: String,
    pub expires_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// How an acquisition was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireGrant {
    /// No lock row existed.
    Fresh,
    /// The caller already held the lease; it is extended.
    Renewal,
    /// An expired lease is reclaimed.
    ReclaimExpired { previous_holder: String },
    /// A live lease held by someone else is overridden by force.
    Override { previous_holder: String },
}

/// Decide whether `holder` may take the lock given the current row.
pub fn check_acquire(
    existing: Option<&RuleLock>,
    rule_id: DbId,
    holder: &str,
    force: bool,
    now: Timestamp,
) -> Result<AcquireGrant, LockedError> {
    let Some(lock) = existing else {
        return Ok(AcquireGrant::Fresh);
    };
    if lock.is_expired(now) {
        return Ok(AcquireGrant::ReclaimExpired {
            previous_holder: lock.locked_by.clone(),
        });
    }
    if lock.locked_by == holder {
        return Ok(AcquireGrant::Renewal);
    }
    if force {
        return Ok(AcquireGrant::Override {
            previous_holder: lock.locked_by.clone(),
        });
    }
    Err(LockedError {
        rule_id,
        held_by: lock.locked_by.clone(),
        expires_at: lock.expires_at,
    })
}

/// Whether a non-forced release by `holder` should clear the row.
///
/// Releasing a lock that does not exist, or that belongs to someone else,
/// is a no-op.
pub fn may_release(existing: Option<&RuleLock>, holder: &str) -> bool {
    existing.is_some_and(|lock| lock.locked_by == holder)
}
