use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use brm_core::config::EngineConfig;
use brm_engine::RuleEngine;
use brm_events::{EventBus, EventPersistence};
use brm_worker::{lock_sweep, Scheduler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        holder = %config.lock_holder,
        lock_ttl_mins = config.lock_ttl_mins,
        edge_policy = ?config.edge_policy,
        "Loaded engine configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = brm_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    brm_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    brm_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let persistence_handle =
        tokio::spawn(EventPersistence::run(pool.clone(), event_bus.subscribe()));

    // --- Services ---
    let cancel = CancellationToken::new();
    let poll = Duration::from_secs(config.scheduler_poll_secs);
    let sweep = Duration::from_secs(config.lock_sweep_secs);
    let engine = Arc::new(RuleEngine::new(pool.clone(), config, Arc::clone(&event_bus)));

    let scheduler_handle =
        tokio::spawn(Scheduler::new(Arc::clone(&engine), poll).run(cancel.clone()));
    let sweep_handle = tokio::spawn(lock_sweep::run(pool, sweep, cancel.clone()));
    tracing::info!("Worker started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl-C handler")?;
    tracing::info!("Shutdown requested");

    cancel.cancel();
    let _ = scheduler_handle.await;
    let _ = sweep_handle.await;

    // Dropping every sender closes the channel and ends persistence.
    drop(engine);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence_handle).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// `BRM_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "brm_worker=debug,brm_engine=debug".into());
    let json = std::env::var("BRM_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
