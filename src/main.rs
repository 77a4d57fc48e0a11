//! Freight Edge server
//!
//! Runs the edge layer's own endpoints (health, stats, invalidation,
//! sessions) over the configured store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use freight_edge::config::{Config, StoreBackend};
use freight_edge::store::{MemoryStore, RedisStore, Store};
use freight_edge::tasks::{spawn_metrics_task, spawn_sweep_task, spawn_warming_task};
use freight_edge::{create_router, AppState};

/// Main entry point for the Freight Edge server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration (invalid configuration aborts startup)
/// 3. Build the store and the application state
/// 4. Start background tasks enabled by the feature flags
/// 5. Serve HTTP until SIGINT/SIGTERM, then abort the tasks
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "freight_edge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Freight Edge");

    let config = Config::from_env().context("refusing to start with invalid configuration")?;
    info!(
        port = config.server_port,
        backend = ?config.store.backend,
        rate_limit = config.rate_limit.limit,
        window = ?config.rate_limit.window,
        fail_mode = %config.rate_limit.fail_mode,
        trusted_proxies = ?config.trusted_proxies,
        "configuration loaded"
    );

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let store: Arc<dyn Store> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisStore::new(&config.store)?),
        StoreBackend::Memory => {
            let memory = Arc::new(MemoryStore::new(config.store.memory_max_entries));
            tasks.push(spawn_sweep_task(
                Arc::clone(&memory),
                config.store.memory_sweep_interval,
            ));
            memory
        }
    };

    let state = AppState::new(store, &config);

    let initial = state.health.check().await;
    if initial.reachable {
        info!(backend = initial.backend, latency_ms = ?initial.latency_ms, "store reachable");
    } else {
        warn!(backend = initial.backend, error = ?initial.error, "store unreachable at startup, serving degraded");
    }

    if config.features.metrics {
        tasks.push(spawn_metrics_task(
            Arc::clone(&state.stats),
            config.features.metrics_interval,
        ));
    }

    let app = create_router(state).context("refusing to start with invalid route groups")?;

    if config.features.cache_warming {
        tasks.push(spawn_warming_task(
            app.clone(),
            config.features.warming_paths.clone(),
            config.features.warming_interval,
        ));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(tasks))
    .await
    .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts the
/// background tasks.
async fn shutdown_signal(tasks: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
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

    for task in &tasks {
        task.abort();
    }
    warn!(count = tasks.len(), "background tasks aborted");
}
