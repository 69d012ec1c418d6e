//! Pipeline definition types
//!
//! A pipeline is an ordered list of stages. Actions inside a stage run
//! concurrently; stages run strictly one after another. Artifact wiring
//! between stages is declared here and validated before a run starts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::domain::artifact::ArtifactRef;
use crate::domain::event::TriggerEvent;
use crate::domain::health::DeploymentPolicy;
use crate::domain::image::{ImageReference, Platform, arch_tag, is_valid_tag};
use crate::error::DefinitionError;

/// Pipeline definition
///
/// Immutable once a run has started; controllers hold it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub trigger: TriggerFilter,
    pub stages: Vec<StageDefinition>,
}

/// A barrier-synchronized group of concurrently executing actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    pub actions: Vec<ActionDefinition>,
}

/// A unit of work inside a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    /// Artifacts consumed, all produced by the preceding stage
    #[serde(default)]
    pub inputs: Vec<ArtifactRef>,
    /// Artifact published when the action succeeds
    #[serde(default)]
    pub output: Option<ArtifactRef>,
    pub spec: ActionSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Build,
    Merge,
    Describe,
    Deploy,
}

/// Kind-specific action configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    Build(BuildEnvironment),
    Merge(MergeSpec),
    Describe(ReleaseConfig),
    Deploy(DeploySpec),
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionSpec::Build(_) => ActionKind::Build,
            ActionSpec::Merge(_) => ActionKind::Merge,
            ActionSpec::Describe(_) => ActionKind::Describe,
            ActionSpec::Deploy(_) => ActionKind::Deploy,
        }
    }
}

/// Parameters of one per-architecture build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    pub registry_uri: String,
    pub base_tag: String,
    pub platform: Platform,
    /// Dockerfile path relative to the build workspace
    pub dockerfile_path: String,
}

impl BuildEnvironment {
    /// `<base-tag>-<arch>`
    pub fn image_tag(&self) -> String {
        arch_tag(&self.base_tag, self.platform)
    }

    pub fn image(&self) -> ImageReference {
        ImageReference::for_platform(self.registry_uri.clone(), &self.base_tag, self.platform)
    }

    /// Environment handed to the build runner
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("REPOSITORY_URI".to_string(), self.registry_uri.clone()),
            ("IMAGE_TAG".to_string(), self.image_tag()),
            ("PLATFORM".to_string(), self.platform.as_str().to_string()),
            ("PATH_TO_DOCKERFILE".to_string(), self.dockerfile_path.clone()),
            ("DOCKER_CLI_EXPERIMENTAL".to_string(), "enabled".to_string()),
        ])
    }

    fn validate(&self) -> Result<(), String> {
        if self.registry_uri.trim().is_empty() {
            return Err("registry URI is empty".to_string());
        }
        if !is_valid_tag(&self.image_tag()) {
            return Err(format!("'{}' is not a valid image tag", self.image_tag()));
        }
        let path = std::path::Path::new(&self.dockerfile_path);
        if self.dockerfile_path.is_empty() || path.is_absolute() {
            return Err("dockerfile path must be relative to the workspace".to_string());
        }
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err("dockerfile path must not leave the workspace".to_string());
        }
        Ok(())
    }
}

/// Parameters of the manifest list merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSpec {
    pub registry_uri: String,
    pub base_tag: String,
    pub container_name: String,
}

impl MergeSpec {
    /// Manifest list reference the merge writes
    pub fn target(&self) -> ImageReference {
        ImageReference::new(self.registry_uri.clone(), self.base_tag.clone())
    }

    /// Environment the merge step exposes to tooling and diagnostics
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("REPOSITORY_URI".to_string(), self.registry_uri.clone()),
            ("IMAGE_TAG".to_string(), self.base_tag.clone()),
            ("IMAGE_TAG_AMD64".to_string(), arch_tag(&self.base_tag, Platform::Amd64)),
            ("IMAGE_TAG_ARM64".to_string(), arch_tag(&self.base_tag, Platform::Arm64)),
            ("CONTAINER_NAME".to_string(), self.container_name.clone()),
            ("DOCKER_CLI_EXPERIMENTAL".to_string(), "enabled".to_string()),
        ])
    }
}

/// Static configuration of the release descriptor builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Fixed container identifier written into every descriptor
    pub container_name: String,
}

/// Parameters of a deploy action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySpec {
    pub service_name: String,
    pub policy: DeploymentPolicy,
}

/// Which external events start a run of this pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum TriggerFilter {
    /// Source pushes to exactly this branch
    SourceBranch { branch: String },
    /// Registry pushes whose tag matches this glob (`*` and `?` wildcards)
    RegistryTag { pattern: String },
}

impl TriggerFilter {
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match (self, event) {
            (TriggerFilter::SourceBranch { branch }, TriggerEvent::SourcePush(push)) => {
                push.branch == *branch
            }
            (TriggerFilter::RegistryTag { pattern }, TriggerEvent::RegistryPush(push)) => {
                match push.resolved_tag() {
                    Some(tag) => glob_match(pattern, &tag),
                    // Without a tag the event cannot be filtered; the release
                    // pipeline's descriptor stage rejects it with an audit trail.
                    None => true,
                }
            }
            _ => false,
        }
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        match self {
            TriggerFilter::SourceBranch { branch } if branch.trim().is_empty() => {
                Err(DefinitionError::InvalidTrigger("branch filter is empty".to_string()))
            }
            TriggerFilter::RegistryTag { pattern } if pattern.trim().is_empty() => {
                Err(DefinitionError::InvalidTrigger("tag pattern is empty".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Matches `text` against a glob where `*` is any run and `?` any one char
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p).copied() {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

impl PipelineDefinition {
    /// Validates names, action configuration and static artifact wiring
    ///
    /// Every input must be produced by the immediately preceding stage (the
    /// first stage may only consume the trigger artifact), and every artifact
    /// is produced at most once.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.stages.is_empty() {
            return Err(DefinitionError::NoStages(self.name.clone()));
        }
        self.trigger.validate()?;

        let mut stage_names = HashSet::new();
        let mut action_names = HashSet::new();
        let mut produced: HashSet<ArtifactRef> = HashSet::from([ArtifactRef::trigger()]);
        let mut available: HashSet<ArtifactRef> = HashSet::from([ArtifactRef::trigger()]);

        for stage in &self.stages {
            if !stage_names.insert(stage.name.as_str()) {
                return Err(DefinitionError::DuplicateStage(stage.name.clone()));
            }
            if stage.actions.is_empty() {
                return Err(DefinitionError::EmptyStage(stage.name.clone()));
            }

            let mut outputs = HashSet::new();
            for action in &stage.actions {
                if !action_names.insert(action.name.as_str()) {
                    return Err(DefinitionError::DuplicateAction(action.name.clone()));
                }

                for input in &action.inputs {
                    if !available.contains(input) {
                        return Err(DefinitionError::UnwiredInput {
                            action: action.name.clone(),
                            artifact: input.clone(),
                        });
                    }
                }

                if let Some(output) = &action.output {
                    if !produced.insert(output.clone()) {
                        return Err(DefinitionError::DuplicateOutput(output.clone()));
                    }
                    outputs.insert(output.clone());
                }

                validate_spec(&action.spec).map_err(|reason| DefinitionError::InvalidAction {
                    action: action.name.clone(),
                    reason,
                })?;
            }

            available = outputs;
        }

        Ok(())
    }

    /// Looks up an action by name
    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.stages
            .iter()
            .flat_map(|s| s.actions.iter())
            .find(|a| a.name == name)
    }
}

fn validate_spec(spec: &ActionSpec) -> Result<(), String> {
    match spec {
        ActionSpec::Build(env) => env.validate(),
        ActionSpec::Merge(merge) => {
            if merge.registry_uri.trim().is_empty() {
                return Err("registry URI is empty".to_string());
            }
            if !is_valid_tag(&merge.base_tag) {
                return Err(format!("'{}' is not a valid image tag", merge.base_tag));
            }
            Ok(())
        }
        ActionSpec::Describe(release) => {
            if release.container_name.trim().is_empty() {
                return Err("container name is empty".to_string());
            }
            Ok(())
        }
        ActionSpec::Deploy(deploy) => {
            if deploy.service_name.trim().is_empty() {
                return Err("service name is empty".to_string());
            }
            deploy.policy.validate()
        }
    }
}
