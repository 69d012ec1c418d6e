//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod run;
pub mod trigger;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::dispatcher::Dispatcher;
use crate::repository::RunRepository;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub repository: Arc<dyn RunRepository>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let repository = dispatcher.repository();
        Self {
            dispatcher,
            repository,
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Trigger endpoints
        .route("/trigger/source", post(trigger::source_push))
        .route("/trigger/registry", post(trigger::registry_push))
        // Run endpoints
        .route("/runs", get(run::list_runs))
        .route("/runs/{id}", get(run::get_run))
        .route("/runs/{id}/actions/{action}/logs", get(run::get_action_logs))
        .route("/runs/{id}/cancel", post(run::cancel_run))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json,
        extract::{Path, Query, State},
        http::StatusCode,
    };
    use std::time::Duration;
    use tandem_core::domain::event::SourcePushEvent;
    use tandem_core::domain::run::RunStatus;
    use tandem_core::dto::run::RunQuery;
    use uuid::Uuid;

    use crate::api::error::ApiError;
    use crate::pipelines::{BUILD_PIPELINE, RELEASE_PIPELINE};
    use crate::testing::dispatcher;

    fn state() -> AppState {
        AppState::new(dispatcher(Duration::ZERO).0)
    }

    async fn wait_for_terminal(state: &AppState, id: Uuid) {
        for _ in 0..100 {
            let run = state.repository.find_by_id(id).await.unwrap().unwrap();
            if run.status.is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} did not finish", id);
    }

    #[tokio::test]
    async fn test_create_router() {
        let _router = create_router(state());
    }

    #[tokio::test]
    async fn test_health_check() {
        let Json(health) = health::health_check(State(state())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.active_runs, 0);
    }

    #[tokio::test]
    async fn test_source_trigger_and_run_lookup() {
        let state = state();

        let Json(response) = trigger::source_push(
            State(state.clone()),
            Json(SourcePushEvent {
                branch: "prod".to_string(),
                commit_ref: "abc123".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.runs.len(), 1);
        let started = &response.runs[0];
        assert_eq!(started.pipeline, BUILD_PIPELINE);

        wait_for_terminal(&state, started.run_id).await;

        let Json(run) = run::get_run(State(state.clone()), Path(started.run_id))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);

        let Json(logs) = run::get_action_logs(
            State(state.clone()),
            Path((started.run_id, "build-arm64".to_string())),
        )
        .await
        .unwrap();
        assert!(logs.iter().any(|l| l.message.contains("build-arm64")));

        let Json(listed) = run::list_runs(
            State(state.clone()),
            Query(RunQuery {
                pipeline: Some(RELEASE_PIPELINE.to_string()),
            }),
        )
        .await
        .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_registry_trigger_accepts_partial_payload() {
        let state = state();

        let Json(response) = trigger::registry_push(
            State(state.clone()),
            Json(serde_json::json!({ "repository": "registry.example/app" })),
        )
        .await
        .unwrap();
        assert_eq!(response.runs.len(), 1);
        assert_eq!(response.runs[0].pipeline, RELEASE_PIPELINE);

        let err = trigger::registry_push(State(state), Json(serde_json::json!([1, 2])))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let state = state();
        let id = Uuid::new_v4();

        let err = run::get_run(State(state.clone()), Path(id)).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = run::cancel_run(State(state), Path(id)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_branch_rejected() {
        let err = trigger::source_push(
            State(state()),
            Json(SourcePushEvent {
                branch: " ".to_string(),
                commit_ref: "abc123".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
