//! Trigger DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runs started by a trigger request
///
/// Empty when no pipeline's filter matched the event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub runs: Vec<StartedRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedRun {
    pub run_id: Uuid,
    pub pipeline: String,
}
