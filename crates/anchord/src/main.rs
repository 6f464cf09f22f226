//! anchord — the Anchor scheduling daemon.
//!
//! Single binary that assembles the scheduling subsystems:
//! - State store (redb)
//! - Cluster state cache + informer
//! - Node scorer and scheduler engine
//! - Scheduler controller worker pool
//! - REST API
//!
//! # Usage
//!
//! ```text
//! anchord --config /etc/anchor/anchord.toml --listen 0.0.0.0:8080
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use anchor_api::{ApiState, build_router};
use anchor_placement::NodeScorer;
use anchor_scheduler::{
    ClusterStateCache, NodeChannels, SchedulerController, SchedulerEngine, UpdateBus,
};
use anchor_state::StateStore;

use crate::config::{AnchorConfig, Overrides};

const DEFAULT_LOG_FILTER: &str = "info,anchord=debug,anchor=debug";

#[derive(Parser)]
#[command(name = "anchord", about = "Anchor scheduling daemon")]
struct Cli {
    /// Path to an anchord.toml configuration file.
    #[arg(long, env = "ANCHOR_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "ANCHOR_LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    overrides: Overrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AnchorConfig::load(cli.config.as_deref(), &cli.overrides)?;
    run(config).await
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: AnchorConfig) -> anyhow::Result<()> {
    info!("Anchor daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Subscribe before hydrating so no update published in between is lost.
    let updates = UpdateBus::new(config.informer.channel_capacity);
    let informer_rx = updates.subscribe();

    let cache = Arc::new(ClusterStateCache::new());
    cache
        .hydrate(&store)
        .await
        .context("cluster state hydration failed")?;

    let scorer = NodeScorer::new(config.scoring.clone());
    let engine = Arc::new(SchedulerEngine::new(Arc::clone(&cache), scorer, store.clone()));
    let controller = Arc::new(SchedulerController::new(
        store,
        engine,
        NodeChannels::default(),
        config.controller_config(),
    ));
    info!(
        concurrency = config.scheduler.concurrency,
        lease_secs = config.scheduler.lease_secs,
        max_attempts = config.scheduler.max_attempts,
        "scheduler initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let informer_handle = cache.spawn_informer(informer_rx, shutdown_rx.clone());
    let workers_handle = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        controller,
        cache,
        updates,
    });
    let addr = config.listen;
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = workers_handle.await;
    let _ = informer_handle.await;

    info!("Anchor daemon stopped");
    Ok(())
}
