//! Run API Handlers
//!
//! Read-only access to the run audit trail plus cancellation.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tandem_core::domain::log::LogEntry;
use tandem_core::domain::run::PipelineRun;
use tandem_core::dto::run::{CancelResponse, RunQuery, RunSummary};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

async fn load_run(state: &AppState, id: Uuid) -> ApiResult<PipelineRun> {
    state
        .repository
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))
}

/// GET /runs?pipeline=
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs (pipeline: {:?})", query.pipeline);

    let runs = state.repository.list(query.pipeline.as_deref()).await?;
    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);
    load_run(&state, id).await.map(Json)
}

/// GET /runs/{id}/actions/{action}/logs
pub async fn get_action_logs(
    State(state): State<AppState>,
    Path((id, action)): Path<(Uuid, String)>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let run = load_run(&state, id).await?;
    let record = run.action(&action).ok_or_else(|| {
        ApiError::NotFound(format!("Action '{}' not found in run {}", action, id))
    })?;
    Ok(Json(record.logs.clone()))
}

/// POST /runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    tracing::info!("Cancel requested for run {}", id);

    let cancelled = state.dispatcher.cancel(id).await?;
    Ok(Json(CancelResponse {
        run_id: id,
        cancelled,
    }))
}
