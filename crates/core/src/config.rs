//! Engine configuration loaded from environment variables.

use validator::Validate;

use crate::error::CoreError;
use crate::graph::EdgePolicy;
use crate::lock::{
    DEFAULT_LOCK_DURATION_MINS, LOCK_SWEEP_INTERVAL_SECS, MAX_LOCK_DURATION_MINS,
    MIN_LOCK_DURATION_MINS,
};

pub const DEFAULT_LOCK_HOLDER: &str = "brm-engine";
pub const DEFAULT_SCHEDULER_POLL_SECS: u64 = 10;
pub const DEFAULT_SCHEDULE_STALE_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    #[validate(range(min = MIN_LOCK_DURATION_MINS, max = MAX_LOCK_DURATION_MINS))]
    pub lock_ttl_mins: i64,
    #[validate(length(min = 1, max = 128))]
    pub lock_holder: String,
    pub edge_policy: EdgePolicy,
    pub require_approved: bool,
    /// Per-rule statement timeout; 0 disables it.
    #[validate(range(max = 3_600_000))]
    pub statement_timeout_ms: u64,
    pub abort_on_validation_failure: bool,
    #[validate(range(min = 1, max = 3600))]
    pub scheduler_poll_secs: u64,
    #[validate(range(min = 1, max = 86_400))]
    pub lock_sweep_secs: u64,
    /// A schedule left `Running` longer than this is claimed again.
    #[validate(range(min = 60, max = 604_800))]
    pub schedule_stale_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl_mins: DEFAULT_LOCK_DURATION_MINS,
            lock_holder: DEFAULT_LOCK_HOLDER.to_string(),
            edge_policy: EdgePolicy::Abort,
            require_approved: true,
            statement_timeout_ms: 0,
            abort_on_validation_failure: false,
            scheduler_poll_secs: DEFAULT_SCHEDULER_POLL_SECS,
            lock_sweep_secs: LOCK_SWEEP_INTERVAL_SECS,
            schedule_stale_secs: DEFAULT_SCHEDULE_STALE_SECS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default      |
    /// |-----------------------------------|--------------|
    /// | `BRM_LOCK_TTL_MINS`               | `30`         |
    /// | `BRM_LOCK_HOLDER`                 | `brm-engine` |
    /// | `BRM_EDGE_POLICY`                 | `abort`      |
    /// | `BRM_REQUIRE_APPROVED`            | `true`       |
    /// | `BRM_STATEMENT_TIMEOUT_MS`        | `0`          |
    /// | `BRM_ABORT_ON_VALIDATION_FAILURE` | `false`      |
    /// | `BRM_SCHEDULER_POLL_SECS`         | `10`         |
    /// | `BRM_LOCK_SWEEP_SECS`             | `60`         |
    /// | `BRM_SCHEDULE_STALE_SECS`         | `3600`       |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            lock_ttl_mins: parse_or(
                var("BRM_LOCK_TTL_MINS"),
                "BRM_LOCK_TTL_MINS",
                defaults.lock_ttl_mins,
            )?,
            lock_holder: var("BRM_LOCK_HOLDER").unwrap_or(defaults.lock_holder),
            edge_policy: match var("BRM_EDGE_POLICY") {
                Some(v) => EdgePolicy::parse(&v).map_err(CoreError::Validation)?,
                None => defaults.edge_policy,
            },
            require_approved: parse_bool(
                var("BRM_REQUIRE_APPROVED"),
                "BRM_REQUIRE_APPROVED",
                defaults.require_approved,
            )?,
            statement_timeout_ms: parse_or(
                var("BRM_STATEMENT_TIMEOUT_MS"),
                "BRM_STATEMENT_TIMEOUT_MS",
                defaults.statement_timeout_ms,
            )?,
            abort_on_validation_failure: parse_bool(
                var("BRM_ABORT_ON_VALIDATION_FAILURE"),
                "BRM_ABORT_ON_VALIDATION_FAILURE",
                defaults.abort_on_validation_failure,
            )?,
            scheduler_poll_secs: parse_or(
                var("BRM_SCHEDULER_POLL_SECS"),
                "BRM_SCHEDULER_POLL_SECS",
                defaults.scheduler_poll_secs,
            )?,
            lock_sweep_secs: parse_or(
                var("BRM_LOCK_SWEEP_SECS"),
                "BRM_LOCK_SWEEP_SECS",
                defaults.lock_sweep_secs,
            )?,
            schedule_stale_secs: parse_or(
                var("BRM_SCHEDULE_STALE_SECS"),
                "BRM_SCHEDULE_STALE_SECS",
                defaults.schedule_stale_secs,
            )?,
        };

        config
            .validate()
            .map_err(|e| CoreError::Validation(format!("Invalid engine configuration: {e}")))?;
        Ok(config)
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lock_ttl_mins)
    }

    pub fn schedule_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.schedule_stale_secs).unwrap_or(i64::MAX))
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has invalid value '{v}'"))),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, key: &str, default: bool) -> Result<bool, CoreError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(CoreError::Validation(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}
