//! HTTP API for health checks and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use worker_lib::{
    health::{ComponentHealth, ComponentStatus, HealthRegistry},
    observability::WorkerMetrics,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub location: String,
    pub health_registry: HealthRegistry,
    pub metrics: WorkerMetrics,
}

impl AppState {
    pub fn new(
        location: impl Into<String>,
        health_registry: HealthRegistry,
        metrics: WorkerMetrics,
    ) -> Self {
        Self {
            location: location.into(),
            health_registry,
            metrics,
        }
    }
}

/// Body of `/healthz`: overall status plus the last outcome of each collection cycle
#[derive(Debug, Serialize)]
pub struct WorkerHealth {
    pub status: ComponentStatus,
    pub location: String,
    pub cycles: HashMap<String, ComponentHealth>,
}

/// 200 while every cycle is at least degraded, 503 once one is failing outright
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = WorkerHealth {
        status: health.status,
        location: state.location.clone(),
        cycles: health.components,
    };
    (status_code, Json(body))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
