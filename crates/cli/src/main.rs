use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use brm_core::config::EngineConfig;
use brm_core::types::DbId;
use brm_engine::{RuleEngine, TraversalRequest, TraversalStart};
use brm_events::{EventBus, EventPersistence};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod view;

use view::GraphView;

#[derive(Debug, Parser)]
#[command(name = "brm")]
#[command(about = "Run and inspect business rule traversals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the dependency graph and print it
    Graph,
    /// Run one rule outside any traversal
    RunRule {
        rule_id: DbId,
        /// Commit the rule's effects instead of rolling back
        #[arg(long)]
        live: bool,
    },
    /// Traverse from the given rule ids
    Run {
        #[arg(required = true)]
        rule_ids: Vec<DbId>,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Traverse from the members of a rule group
    RunGroup {
        group_id: DbId,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Traverse from every root rule
    RunAll {
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Acquire or renew a lock
    Lock {
        rule_id: DbId,
        #[arg(long)]
        holder: String,
        /// Override a live lock held by someone else
        #[arg(long)]
        force: bool,
        /// Lease length in minutes; defaults to BRM_LOCK_TTL_MINS
        #[arg(long)]
        ttl_mins: Option<i64>,
    },
    /// Release a lock
    Unlock {
        rule_id: DbId,
        /// Holder releasing the lock, or the actor for a forced release
        #[arg(long)]
        holder: String,
        /// Release whoever holds the lock
        #[arg(long)]
        force: bool,
    },
    /// Report whether a rule is locked
    IsLocked {
        rule_id: DbId,
        /// Ignore a lock held by this holder
        #[arg(long)]
        excluding: Option<String>,
    },
    /// Run data validations
    Validate {
        /// Only validations on these tables
        #[arg(long = "table")]
        tables: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Commit each passing rule instead of rolling back
    #[arg(long)]
    live: bool,
    #[arg(long)]
    skip_validations: bool,
    /// Lock holder and audit actor
    #[arg(long)]
    actor: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brm_cli=info,brm_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = brm_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    brm_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let event_bus = Arc::new(EventBus::default());
    let persistence = tokio::spawn(EventPersistence::run(pool.clone(), event_bus.subscribe()));
    let engine = RuleEngine::new(pool, config, Arc::clone(&event_bus));

    let result = execute(&engine, cli.command).await;

    // Closing the bus lets persistence drain what was published and exit.
    drop(engine);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence).await;
    result
}

async fn execute(engine: &RuleEngine, command: Command) -> Result<()> {
    match command {
        Command::Graph => {
            let built = engine.build_graph().await?;
            print_json(&GraphView::from(&built))
        }
        Command::RunRule { rule_id, live } => {
            let outcome = engine.run_single_rule(rule_id, !live).await?;
            print_json(&outcome)
        }
        Command::Run { rule_ids, opts } => {
            traverse(engine, TraversalStart::Rules(rule_ids), opts).await
        }
        Command::RunGroup { group_id, opts } => {
            traverse(engine, TraversalStart::Group(group_id), opts).await
        }
        Command::RunAll { opts } => traverse(engine, TraversalStart::AllRoots, opts).await,
        Command::Lock {
            rule_id,
            holder,
            force,
            ttl_mins,
        } => {
            let ttl = ttl_mins.map(chrono::Duration::minutes);
            let claim = engine.acquire_lock(rule_id, &holder, force, ttl).await?;
            print_json(&claim.token)
        }
        Command::Unlock { rule_id, holder, force } => {
            let released = if force {
                engine.force_release(rule_id, &holder).await?
            } else {
                engine.release_lock(rule_id, &holder).await?
            };
            print_json(&serde_json::json!({ "rule_id": rule_id, "released": released }))
        }
        Command::IsLocked { rule_id, excluding } => {
            let locked = engine.is_locked(rule_id, excluding.as_deref()).await?;
            print_json(&serde_json::json!({ "rule_id": rule_id, "locked": locked }))
        }
        Command::Validate { tables } => {
            let tables = (!tables.is_empty()).then_some(tables);
            let results = engine.run_validations(tables.as_deref()).await?;
            print_json(&results)
        }
    }
}

/// Ctrl-C stops the traversal at the next step boundary.
async fn traverse(engine: &RuleEngine, start: TraversalStart, opts: RunOpts) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after the current rule");
                cancel.cancel();
            }
        })
    };

    let mut request = TraversalRequest::new(start, !opts.live)
        .skip_validations(opts.skip_validations)
        .with_cancel(cancel);
    if let Some(actor) = opts.actor {
        request = request.with_actor(actor);
    }
    let result = engine.run_traversal(request).await;
    watcher.abort();

    print_json(&result?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
