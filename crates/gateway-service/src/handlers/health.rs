//! Health and metrics endpoints.

use crate::routes::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// Handler for GET /v1/health
///
/// Liveness plus a database ping; a failing ping reports 503 so load
/// balancers stop routing here.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "up",
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(target: "gw.handlers.health", error = %e, "Database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database: "down",
                }),
            )
                .into_response()
        }
    }
}

/// Handler for GET /metrics
///
/// Renders the Prometheus exposition text. Returns 404 when no recorder
/// was installed (e.g. in tests).
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.as_ref() {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            database: "up",
        };
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"database\":\"up\""));
    }
}
