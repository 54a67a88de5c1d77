//! Quorum Cache server binary
//!
//! Serves a byte-bounded LRU or LFU cache over HTTP, optionally routing
//! writes through the replicated log and snapshotting to disk.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quorum_cache::{
    build_cache, create_router, load_snapshot, spawn_snapshot_task, write_snapshot, AppState,
    CacheStateMachine, Config, LocalLog, ReplicatedCache, StatsCounter,
};

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the engine and restore the last snapshot, if any
/// 4. Attach to the replicated log when enabled
/// 5. Start the background snapshot task
/// 6. Start HTTP server on configured port
/// 7. On SIGINT/SIGTERM, stop the task and write a final snapshot
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quorum_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Quorum Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: capacity={}B, policy={}, port={}, replicated={}, snapshot_interval={}s",
        config.capacity, config.policy, config.server_port, config.replicated, config.snapshot_interval
    );

    let stats = StatsCounter::new();
    let engine = build_cache(config.policy, config.capacity, stats.clone());
    let fsm = Arc::new(CacheStateMachine::new(engine.clone()));

    if let Some(path) = &config.snapshot_path {
        let restored = load_snapshot(&fsm, path)
            .with_context(|| format!("failed to restore snapshot {}", path.display()))?;
        if let Some(entries) = restored {
            info!("Restored {} entries from {}", entries, path.display());
        }
    }

    let state = if config.replicated {
        let log = Arc::new(LocalLog::new());
        log.attach(fsm.clone())
            .context("failed to attach replica to the log")?;
        let cache = Arc::new(ReplicatedCache::new(fsm.clone(), log));
        AppState::replicated(cache, stats)
    } else {
        AppState::new(engine, stats)
    };
    info!("Cache initialized");

    let snapshot_handle = config
        .snapshot_path
        .clone()
        .map(|path| spawn_snapshot_task(fsm.clone(), path, config.snapshot_interval));

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(snapshot_handle))
        .await
        .context("server error")?;

    if let Some(path) = &config.snapshot_path {
        match write_snapshot(&fsm, path) {
            Ok(entries) => info!("Final snapshot written: {} entries", entries),
            Err(err) => error!(error = %err, "Final snapshot failed"),
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts the snapshot
/// task so the final snapshot does not race it.
async fn shutdown_signal(snapshot_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = snapshot_handle {
        handle.abort();
        warn!("Snapshot task aborted");
    }
}
