//! Usage worker
//!
//! Runs next to a tenant namespace, periodically integrating project usage
//! from the metrics store and reporting it to the billing service.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use worker_lib::{
    billing::BillingClient,
    collector::UsageScheduler,
    health::HealthRegistry,
    observability::{StructuredLogger, WorkerMetrics},
    prom::{PromClient, QueryBuilder},
};

mod api;
mod config;

const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting usage-worker");

    let config = config::WorkerConfig::load()?;
    info!(
        location = %config.location,
        namespace = %config.namespace,
        "Worker configured"
    );

    let gateway = Arc::new(PromClient::new(config.prom_client())?);
    let billing = Arc::new(BillingClient::new(config.billing_client())?);

    let health_registry = HealthRegistry::new();
    let metrics = WorkerMetrics::new();

    let logger = StructuredLogger::new(&config.location);
    logger.log_startup(WORKER_VERSION, &config.namespace);

    let app_state = Arc::new(api::AppState::new(
        &config.location,
        health_registry.clone(),
        metrics,
    ));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let scheduler = Arc::new(UsageScheduler::new(
        gateway,
        billing,
        QueryBuilder::new(&config.namespace),
        &config.location,
        config.scheduler(),
        health_registry.clone(),
    ));

    let shutdown = CancellationToken::new();
    let signal = shutdown_signal();
    let worker = tokio::spawn(scheduler.run(shutdown.clone()));

    health_registry.set_ready(true).await;

    let reason = signal.await;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    shutdown.cancel();

    // in-flight iterations finish before exit
    if let Err(e) = worker.await {
        error!(error = %e, "Scheduler task failed");
    }
    info!("Shutdown complete");

    Ok(())
}

/// Resolve on SIGTERM or Ctrl-C, returning which one fired
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
