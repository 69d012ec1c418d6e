//! Standard pipeline definitions
//!
//! - `build`: on a push to the configured branch, build both architectures
//!   in parallel, then merge them into one manifest list.
//! - `release`: on a registry push matching the release tag pattern, derive
//!   a deployment descriptor, then roll the service onto it.

use tandem_core::domain::artifact::ArtifactRef;
use tandem_core::domain::image::Platform;
use tandem_core::domain::pipeline::{
    ActionDefinition, ActionSpec, BuildEnvironment, DeploySpec, MergeSpec, PipelineDefinition,
    ReleaseConfig, StageDefinition, TriggerFilter,
};

use crate::config::OrchestratorConfig;

pub const BUILD_PIPELINE: &str = "build";
pub const RELEASE_PIPELINE: &str = "release";

fn image_artifact(platform: Platform) -> ArtifactRef {
    ArtifactRef::new(format!("image-{}", platform.arch()))
}

pub fn build_pipeline(config: &OrchestratorConfig) -> PipelineDefinition {
    let builds = Platform::ALL
        .iter()
        .map(|platform| ActionDefinition {
            name: format!("build-{}", platform.arch()),
            inputs: vec![ArtifactRef::trigger()],
            output: Some(image_artifact(*platform)),
            spec: ActionSpec::Build(BuildEnvironment {
                registry_uri: config.registry_uri.clone(),
                base_tag: config.image_tag.clone(),
                platform: *platform,
                dockerfile_path: config.dockerfile_path.clone(),
            }),
        })
        .collect();

    let merge = ActionDefinition {
        name: "merge".to_string(),
        inputs: Platform::ALL.iter().map(|p| image_artifact(*p)).collect(),
        output: Some(ArtifactRef::new("manifest")),
        spec: ActionSpec::Merge(MergeSpec {
            registry_uri: config.registry_uri.clone(),
            base_tag: config.image_tag.clone(),
            container_name: config.container_name.clone(),
        }),
    };

    PipelineDefinition {
        name: BUILD_PIPELINE.to_string(),
        trigger: TriggerFilter::SourceBranch {
            branch: config.branch.clone(),
        },
        stages: vec![
            StageDefinition {
                name: "build".to_string(),
                actions: builds,
            },
            StageDefinition {
                name: "merge".to_string(),
                actions: vec![merge],
            },
        ],
    }
}

pub fn release_pipeline(config: &OrchestratorConfig) -> PipelineDefinition {
    PipelineDefinition {
        name: RELEASE_PIPELINE.to_string(),
        trigger: TriggerFilter::RegistryTag {
            pattern: config.release_tag_pattern.clone(),
        },
        stages: vec![
            StageDefinition {
                name: "describe".to_string(),
                actions: vec![ActionDefinition {
                    name: "describe".to_string(),
                    inputs: vec![ArtifactRef::trigger()],
                    output: Some(ArtifactRef::new("descriptor")),
                    spec: ActionSpec::Describe(ReleaseConfig {
                        container_name: config.container_name.clone(),
                    }),
                }],
            },
            StageDefinition {
                name: "deploy".to_string(),
                actions: vec![ActionDefinition {
                    name: "deploy".to_string(),
                    inputs: vec![ArtifactRef::new("descriptor")],
                    output: Some(ArtifactRef::new("deployment")),
                    spec: ActionSpec::Deploy(DeploySpec {
                        service_name: config.service_name.clone(),
                        policy: config.deployment_policy.clone(),
                    }),
                }],
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::domain::event::TriggerEvent;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::new("registry.example/app")
    }

    #[test]
    fn test_standard_pipelines_are_valid() {
        assert!(build_pipeline(&config()).validate().is_ok());
        assert!(release_pipeline(&config()).validate().is_ok());
    }

    #[test]
    fn test_build_pipeline_shape() {
        let def = build_pipeline(&config());
        assert_eq!(def.stages.len(), 2);
        assert_eq!(def.stages[0].actions.len(), 2);
        assert_eq!(def.stages[1].actions.len(), 1);

        let merge = def.action("merge").unwrap();
        assert_eq!(
            merge.inputs,
            vec![ArtifactRef::new("image-amd64"), ArtifactRef::new("image-arm64")]
        );
    }

    #[test]
    fn test_trigger_binding() {
        let build = build_pipeline(&config());
        assert!(build.trigger.matches(&TriggerEvent::source_push("prod", "abc")));
        assert!(!build.trigger.matches(&TriggerEvent::source_push("feature/x", "abc")));

        let release = release_pipeline(&config());
        assert!(release
            .trigger
            .matches(&TriggerEvent::registry_push("registry.example/app:latest")));
        assert!(!release
            .trigger
            .matches(&TriggerEvent::registry_push("registry.example/app:latest-amd64")));
    }
}
