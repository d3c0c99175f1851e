//! TCC Coordinator - recovery worker and routing core for TCC transactions
//!
//! Hosts the process-wide coordination components, drives periodic
//! recovery of incomplete transactions, and exposes status and metrics.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use tcc_coordinator::api;
use tcc_coordinator::config::Settings;
use tcc_coordinator::metrics::MetricsServer;
use tcc_coordinator::recovery::HttpTransactionRecovery;
use tcc_coordinator::routing::StaticServerList;
use tcc_coordinator::TccRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting TCC Coordinator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} ({} static services)",
        settings.coordinator.application_name,
        settings.routing.services.len()
    );

    let recovery = Arc::new(HttpTransactionRecovery::new(
        settings.recovery.endpoint.clone(),
        Duration::from_millis(settings.participant.request_timeout_ms),
    )?);
    let servers = Arc::new(StaticServerList::from_config(&settings.routing)?);

    let runtime = Arc::new(TccRuntime::new(settings.clone(), recovery, servers)?);
    info!(
        "Coordinator endpoint: {}",
        runtime.endpoint().identifier()
    );

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let runtime = runtime.clone();
        async move {
            if let Err(e) = api::run_server(config, runtime).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start recovery worker
    let recovery_handle = tokio::spawn({
        let worker = runtime.worker().clone();
        async move {
            if let Err(e) = worker.run().await {
                error!("Recovery worker error: {}", e);
            }
        }
    });

    info!("TCC Coordinator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Let the worker finish its grace period
    runtime.worker().release();
    if let Err(e) = recovery_handle.await {
        error!("Recovery worker task failed: {}", e);
    }

    // Abort background tasks
    let mut handles = vec![api_handle];
    handles.extend(metrics_handle);
    for handle in &handles {
        handle.abort();
    }
    futures::future::join_all(handles).await;

    info!("TCC Coordinator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tcc_coordinator=debug,hyper=warn,reqwest=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
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
