//! ReservePool - Entry Point
//!
//! Runs the reserve with its refill worker and, when enabled, the metrics
//! endpoints, until asked to stop.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use reservepool::metrics::{NoopMetrics, PoolCounters, PoolMetrics};
use reservepool::{Config, PoolRegistry, VERSION};

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // Load configuration, falling back to defaults when the file is absent
    let config = if config_path.exists() {
        Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        Config::default()
    };

    // Initialize tracing/logging
    reservepool::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        "Starting ReservePool"
    );

    let metrics: Arc<dyn PoolMetrics> = if config.metrics.enabled {
        Arc::new(PoolCounters::new(&config.pool.orders(), config.pool.alloc_classes))
    } else {
        Arc::new(NoopMetrics)
    };

    // Create the registry and start the refill worker
    let registry = PoolRegistry::builder(config.pool.clone())
        .metrics(metrics)
        .build()?;
    registry
        .start()
        .context("Failed to spawn refill worker")?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        reservepool::metrics::init_metrics(&config.metrics, registry.clone())?;
        reservepool::metrics::start_api_server(config.metrics.api_addr, registry.clone());
        info!(
            bind_addr = %config.metrics.bind_addr,
            api_addr = %config.metrics.api_addr,
            "Metrics endpoints started"
        );
    }

    info!(
        pools = registry.pools().len(),
        classes = registry.alloc_classes(),
        "Reserve pool running"
    );

    shutdown_signal().await;
    info!("Shutdown signal received, releasing reserve...");

    let released = registry.shutdown();
    info!(released, "ReservePool stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
