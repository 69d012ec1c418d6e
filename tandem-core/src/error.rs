//! Error types shared across Tandem crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::artifact::ArtifactRef;

/// Why a build action failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildFailureReason {
    /// The dockerfile path does not resolve inside the workspace
    DockerfileNotFound,
    /// The build runner exited with a non-zero status
    BuildExited,
    /// The registry refused the push (auth or permissions)
    PushRejected,
    /// The build runner could not be started at all
    RunnerUnavailable,
}

impl fmt::Display for BuildFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildFailureReason::DockerfileNotFound => "dockerfile not found",
            BuildFailureReason::BuildExited => "build exited with error",
            BuildFailureReason::PushRejected => "push rejected",
            BuildFailureReason::RunnerUnavailable => "build runner unavailable",
        };
        f.write_str(s)
    }
}

/// Failure of a single pipeline action
///
/// Errors are local to the action that raised them; the controller turns any
/// of them into a failed stage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("build failed ({reason}): {diagnostics}")]
    BuildFailed {
        reason: BuildFailureReason,
        diagnostics: String,
    },

    #[error("manifest merge failed: source tag(s) missing from registry: {}", missing.join(", "))]
    MergeFailed { missing: Vec<String> },

    #[error("descriptor build failed: {0}")]
    DescriptorBuildFailed(String),

    #[error("deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("deployment did not converge within {}s", elapsed.as_secs())]
    DeploymentTimedOut { elapsed: Duration },

    #[error("action cancelled")]
    Cancelled,

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ActionError {
    /// Stable identifier of the error kind
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::BuildFailed { .. } => "BuildFailed",
            ActionError::MergeFailed { .. } => "MergeFailed",
            ActionError::DescriptorBuildFailed(_) => "DescriptorBuildFailed",
            ActionError::DeploymentFailed(_) => "DeploymentFailed",
            ActionError::DeploymentTimedOut { .. } => "DeploymentTimedOut",
            ActionError::Cancelled => "Cancelled",
            ActionError::Infrastructure(_) => "Infrastructure",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionError::DeploymentTimedOut { .. })
    }
}

/// Serializable record of an action failure, kept on the run for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub code: String,
    pub message: String,
}

impl From<&ActionError> for ActionFailure {
    fn from(err: &ActionError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Problems found while validating a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("pipeline '{0}' has no stages")]
    NoStages(String),

    #[error("stage '{0}' has no actions")]
    EmptyStage(String),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("duplicate action name '{0}'")]
    DuplicateAction(String),

    #[error("artifact '{0}' is produced by more than one action")]
    DuplicateOutput(ArtifactRef),

    #[error("action '{action}' consumes '{artifact}', which is not produced by the preceding stage")]
    UnwiredInput { action: String, artifact: ArtifactRef },

    #[error("action '{action}' is misconfigured: {reason}")]
    InvalidAction { action: String, reason: String },

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}

/// Violation of the write-once artifact rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("artifact '{0}' has already been published")]
pub struct ArtifactConflict(pub ArtifactRef);
