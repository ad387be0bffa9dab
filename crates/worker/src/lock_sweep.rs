//! Periodic cleanup of expired lock rows.
//!
//! Expired leases are already treated as absent on every read; the sweep
//! only keeps `rule_locks` small.

use std::time::Duration;

use brm_db::repositories::RuleLockRepo;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(pool: PgPool, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Lock sweep started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Lock sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                match RuleLockRepo::delete_expired(&pool, Utc::now()).await {
                    Ok(0) => tracing::debug!("Lock sweep: nothing expired"),
                    Ok(deleted) => tracing::info!(deleted, "Lock sweep: removed expired leases"),
                    Err(e) => tracing::error!(error = %e, "Lock sweep failed"),
                }
            }
        }
    }
}
