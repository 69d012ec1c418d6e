//! Run DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus};

/// Run summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    pub current_stage: String,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            pipeline: run.pipeline.clone(),
            status: run.status,
            current_stage: run
                .stages
                .get(run.current_stage)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            requested_at: run.requested_at,
            completed_at: run.completed_at,
            error: run.error.clone(),
        }
    }
}

/// Query parameters for run listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunQuery {
    pub pipeline: Option<String>,
}

/// Result of a cancellation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub run_id: Uuid,
    /// False when the run had already reached a terminal status
    pub cancelled: bool,
}
