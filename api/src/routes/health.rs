//! Health and readiness endpoints

use crate::ApiState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// Liveness payload
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `healthy`
    pub status: String,
    /// Crate version
    pub version: String,
    /// RFC 3339 time of the check
    pub timestamp: String,
}

/// Readiness payload
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Always `ready`
    pub status: String,
    /// `distributed` or `local`
    pub rate_limit_backend: String,
    /// Serving from the local fallback during an outage
    pub degraded: bool,
}

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness, including rate-limit backend mode
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse)
    ),
    tag = "health"
)]
pub async fn ready(State(state): State<Arc<ApiState>>) -> Json<ReadyResponse> {
    let (backend, degraded) = match &state.failover {
        Some(failover) if failover.is_degraded() => ("local", true),
        Some(_) => ("distributed", false),
        None => ("local", false),
    };
    Json(ReadyResponse {
        status: "ready".into(),
        rate_limit_backend: backend.into(),
        degraded,
    })
}
