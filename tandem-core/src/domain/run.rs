//! Pipeline run records
//!
//! A run is created when a trigger matches, mutated only by the controller as
//! stages progress, and retired on a terminal status. Retired runs are kept
//! for audit and never reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::artifact::{Artifact, ArtifactContent, ArtifactRef};
use crate::domain::event::TriggerEvent;
use crate::domain::log::LogEntry;
use crate::domain::pipeline::{ActionKind, PipelineDefinition};
use crate::error::{ActionFailure, ArtifactConflict};

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled | RunStatus::TimedOut
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "Pending"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
            RunStatus::Cancelled => write!(f, "Cancelled"),
            RunStatus::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Status of a stage or of a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// One execution of a pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger: TriggerEvent,
    pub status: RunStatus,
    /// Index of the active (or last attempted) stage
    pub current_stage: usize,
    pub stages: Vec<StageRun>,
    /// Artifacts published so far, keyed by reference
    pub artifacts: BTreeMap<ArtifactRef, Artifact>,
    pub error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRun {
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub actions: Vec<ActionRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRun {
    pub name: String,
    pub kind: ActionKind,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only when the output was propagated to the next stage
    pub output: Option<ArtifactRef>,
    pub failure: Option<ActionFailure>,
    /// Diagnostic output captured while the action ran
    pub logs: Vec<LogEntry>,
}

impl PipelineRun {
    /// Creates a pending run with one pending record per stage and action
    pub fn new(definition: &PipelineDefinition, trigger: TriggerEvent) -> Self {
        let stages = definition
            .stages
            .iter()
            .map(|stage| StageRun {
                name: stage.name.clone(),
                status: StepStatus::Pending,
                started_at: None,
                completed_at: None,
                actions: stage
                    .actions
                    .iter()
                    .map(|action| ActionRun {
                        name: action.name.clone(),
                        kind: action.spec.kind(),
                        status: StepStatus::Pending,
                        started_at: None,
                        completed_at: None,
                        output: None,
                        failure: None,
                        logs: Vec::new(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            pipeline: definition.name.clone(),
            trigger,
            status: RunStatus::Pending,
            current_stage: 0,
            stages,
            artifacts: BTreeMap::new(),
            error: None,
            requested_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Publishes an artifact; artifacts are write-once
    pub fn publish(&mut self, artifact: Artifact) -> Result<(), ArtifactConflict> {
        if self.artifacts.contains_key(&artifact.reference) {
            return Err(ArtifactConflict(artifact.reference));
        }
        self.artifacts.insert(artifact.reference.clone(), artifact);
        Ok(())
    }

    /// Content of a published artifact
    pub fn artifact(&self, reference: &ArtifactRef) -> Option<&ArtifactContent> {
        self.artifacts.get(reference).map(|a| &a.content)
    }

    /// Finds an action record by name across all stages
    pub fn action(&self, name: &str) -> Option<&ActionRun> {
        self.stages
            .iter()
            .flat_map(|s| s.actions.iter())
            .find(|a| a.name == name)
    }

    pub fn action_mut(&mut self, name: &str) -> Option<&mut ActionRun> {
        self.stages
            .iter_mut()
            .flat_map(|s| s.actions.iter_mut())
            .find(|a| a.name == name)
    }

    /// Moves the run to a terminal status
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::SourcePushEvent;
    use crate::domain::pipeline::{
        ActionDefinition, ActionSpec, ReleaseConfig, StageDefinition, TriggerFilter,
    };

    fn definition() -> PipelineDefinition {
        PipelineDefinition {
            name: "release".to_string(),
            trigger: TriggerFilter::RegistryTag {
                pattern: "*".to_string(),
            },
            stages: vec![StageDefinition {
                name: "describe".to_string(),
                actions: vec![ActionDefinition {
                    name: "describe".to_string(),
                    inputs: vec![ArtifactRef::trigger()],
                    output: Some(ArtifactRef::new("descriptor")),
                    spec: ActionSpec::Describe(ReleaseConfig {
                        container_name: "app".to_string(),
                    }),
                }],
            }],
        }
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = PipelineRun::new(&definition(), TriggerEvent::registry_push("r/app:v1"));
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.stages.len(), 1);
        assert_eq!(run.action("describe").unwrap().kind, ActionKind::Describe);
        assert_eq!(run.action("describe").unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn test_artifacts_are_write_once() {
        let mut run = PipelineRun::new(&definition(), TriggerEvent::registry_push("r/app:v1"));
        let content = ArtifactContent::Source(SourcePushEvent {
            branch: "prod".to_string(),
            commit_ref: "abc".to_string(),
        });

        run.publish(Artifact::new(ArtifactRef::new("a"), "x", content.clone()))
            .unwrap();
        let err = run
            .publish(Artifact::new(ArtifactRef::new("a"), "y", content))
            .unwrap_err();
        assert_eq!(err, ArtifactConflict(ArtifactRef::new("a")));
        assert_eq!(run.artifacts[&ArtifactRef::new("a")].produced_by, "x");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::TimedOut.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
