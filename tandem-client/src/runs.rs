//! Run endpoints

use tandem_core::domain::log::LogEntry;
use tandem_core::domain::run::PipelineRun;
use tandem_core::dto::run::{CancelResponse, RunSummary};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// List runs, newest first, optionally for one pipeline only
    pub async fn list_runs(&self, pipeline: Option<&str>) -> Result<Vec<RunSummary>> {
        let mut request = self.client.get(self.url("/runs"));
        if let Some(pipeline) = pipeline {
            request = request.query(&[("pipeline", pipeline)]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    /// Get a run with its stages, actions and artifacts
    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let response = self
            .client
            .get(self.url(&format!("/runs/{}", run_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Diagnostic logs captured for one action of a run
    pub async fn get_action_logs(&self, run_id: Uuid, action: &str) -> Result<Vec<LogEntry>> {
        let response = self
            .client
            .get(self.url(&format!("/runs/{}/actions/{}/logs", run_id, action)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a run
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<CancelResponse> {
        let response = self
            .client
            .post(self.url(&format!("/runs/{}/cancel", run_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
