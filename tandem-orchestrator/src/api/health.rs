//! Health Check API Handler

use axum::{Json, extract::State};
use tandem_core::dto::health::HealthResponse;

use crate::api::AppState;

/// GET /health
/// Liveness plus the number of runs in flight
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_runs: state.dispatcher.active_runs(),
    })
}
