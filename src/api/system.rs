//! Liveness and readiness probes.

use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;

use super::{AppState, HealthLiveResponse, HealthReadyResponse};

/// `GET /api/health/live`
pub async fn health_live() -> Json<HealthLiveResponse> {
    Json(HealthLiveResponse { status: "alive" })
}

/// `GET /api/health/ready`
///
/// Ready once the database answers a ping.
pub async fn health_ready(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthReadyResponse>) {
    let database = match state.store().ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            false
        }
    };

    let (status, label) = if database {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        status,
        Json(HealthReadyResponse {
            status: label,
            database,
        }),
    )
}
