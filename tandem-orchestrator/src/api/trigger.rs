//! Trigger API Handlers
//!
//! Entry points for source pushes and registry notifications. Each request
//! starts one run per pipeline whose filter accepts the event.

use axum::{Json, extract::State};
use serde_json::Value;
use tandem_core::domain::event::{RegistryPushEvent, SourcePushEvent, TriggerEvent};
use tandem_core::dto::trigger::{StartedRun, TriggerResponse};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

async fn dispatch(state: &AppState, event: TriggerEvent) -> ApiResult<Json<TriggerResponse>> {
    let handles = state.dispatcher.dispatch(event).await?;
    Ok(Json(TriggerResponse {
        runs: handles.iter().map(StartedRun::from).collect(),
    }))
}

/// POST /trigger/source
pub async fn source_push(
    State(state): State<AppState>,
    Json(event): Json<SourcePushEvent>,
) -> ApiResult<Json<TriggerResponse>> {
    tracing::info!(
        "Source push on '{}' at {}",
        event.branch,
        event.commit_ref
    );

    if event.branch.trim().is_empty() {
        return Err(ApiError::BadRequest("branch cannot be empty".to_string()));
    }

    dispatch(&state, TriggerEvent::SourcePush(event)).await
}

/// POST /trigger/registry
///
/// The payload is accepted even without an `imageUri`; the release
/// pipeline then fails at its descriptor stage and the run stays on record.
pub async fn registry_push(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<TriggerResponse>> {
    let event: RegistryPushEvent = serde_json::from_value(payload)
        .map_err(|e| ApiError::BadRequest(format!("Invalid registry notification: {}", e)))?;

    tracing::info!("Registry push notification for {:?}", event.image_uri);

    dispatch(&state, TriggerEvent::RegistryPush(event)).await
}
