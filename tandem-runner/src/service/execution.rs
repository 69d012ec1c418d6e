//! Execution service
//!
//! Runs one action of a pipeline stage:
//! - Resolves the action's input artifacts into the shape its kind expects
//! - Dispatches to the build job, merger, descriptor builder or deployment driver
//! - Returns the content to publish as the action's output artifact

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tandem_core::domain::artifact::{Artifact, ArtifactContent};
use tandem_core::domain::descriptor::DeploymentDescriptor;
use tandem_core::domain::image::Platform;
use tandem_core::domain::pipeline::{ActionDefinition, ActionSpec, MergeSpec};
use tandem_core::error::ActionError;
use tracing::{debug, info};

use crate::build::ArchitectureBuildJob;
use crate::context::ActionContext;
use crate::deploy::{DeploymentDriver, ServiceBackend};
use crate::manifest::{ManifestMerger, MergeRequest};
use crate::registry::ContainerRegistry;
use crate::release::ReleaseDescriptorBuilder;

/// Service trait for executing pipeline actions
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes one action
    ///
    /// # Arguments
    /// * `pipeline` - Name of the pipeline the action belongs to
    /// * `action` - The action definition
    /// * `inputs` - Published artifacts named by the action's inputs
    /// * `ctx` - Context collecting the action's diagnostics
    ///
    /// # Returns
    /// The content of the action's output artifact, if it produces one
    async fn execute_action(
        &self,
        pipeline: &str,
        action: &ActionDefinition,
        inputs: Vec<Artifact>,
        ctx: Arc<ActionContext>,
    ) -> Result<Option<ArtifactContent>, ActionError>;
}

/// Standard implementation of ExecutionService
pub struct StandardExecutionService {
    build_job: ArchitectureBuildJob,
    registry: Arc<dyn ContainerRegistry>,
    service_backend: Arc<dyn ServiceBackend>,
}

impl StandardExecutionService {
    pub fn new(
        build_job: ArchitectureBuildJob,
        registry: Arc<dyn ContainerRegistry>,
        service_backend: Arc<dyn ServiceBackend>,
    ) -> Self {
        Self {
            build_job,
            registry,
            service_backend,
        }
    }

    /// Source revision details exposed to the build runner
    fn source_env(inputs: &[Artifact]) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for input in inputs {
            if let ArtifactContent::Source(push) = &input.content {
                env.insert("COMMIT_REF".to_string(), push.commit_ref.clone());
                env.insert("SOURCE_BRANCH".to_string(), push.branch.clone());
            }
        }
        env
    }

    /// Merge request from the build outputs, falling back to the tag convention
    fn merge_request(spec: &MergeSpec, inputs: &[Artifact]) -> MergeRequest {
        let mut request = MergeRequest::from_spec(spec);
        for input in inputs {
            if let ArtifactContent::Image { image, platform } = &input.content {
                match platform {
                    Platform::Amd64 => request.amd64_tag = image.tag.clone(),
                    Platform::Arm64 => request.arm64_tag = image.tag.clone(),
                }
            }
        }
        request
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute_action(
        &self,
        pipeline: &str,
        action: &ActionDefinition,
        inputs: Vec<Artifact>,
        ctx: Arc<ActionContext>,
    ) -> Result<Option<ArtifactContent>, ActionError> {
        info!(
            "[{}] executing {:?} action for run {}",
            action.name,
            action.spec.kind(),
            ctx.run_id
        );
        debug!(
            "[{}] inputs: {:?}",
            action.name,
            inputs.iter().map(|a| a.reference.as_str()).collect::<Vec<_>>()
        );

        match &action.spec {
            ActionSpec::Build(env) => {
                let image = self
                    .build_job
                    .execute(pipeline, env, Self::source_env(&inputs), &ctx)
                    .await?;
                Ok(Some(ArtifactContent::Image {
                    image,
                    platform: env.platform,
                }))
            }

            ActionSpec::Merge(spec) => {
                for (key, value) in spec.env_vars() {
                    ctx.log_debug(format!("{}={}", key, value));
                }
                let request = Self::merge_request(spec, &inputs);
                let image = ManifestMerger::new(self.registry.clone())
                    .merge(&request, &ctx)
                    .await?;
                Ok(Some(ArtifactContent::ManifestList {
                    image,
                    platforms: Platform::ALL.to_vec(),
                }))
            }

            ActionSpec::Describe(config) => {
                let event = inputs
                    .iter()
                    .find_map(|a| match &a.content {
                        ArtifactContent::RegistryEvent(event) => Some(event),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        ActionError::DescriptorBuildFailed(
                            "no registry event among the inputs".to_string(),
                        )
                    })?;

                let descriptor = ReleaseDescriptorBuilder::new(config.clone())
                    .build(event)
                    .inspect_err(|e| ctx.log_error(e.to_string()))?;
                let content = ArtifactContent::descriptor(&descriptor)
                    .map_err(|e| ActionError::DescriptorBuildFailed(e.to_string()))?;
                ctx.log_info(format!(
                    "Descriptor: {} -> {}",
                    descriptor.container_name, descriptor.image_uri
                ));
                Ok(Some(content))
            }

            ActionSpec::Deploy(spec) => {
                let wire = inputs
                    .iter()
                    .find_map(|a| match &a.content {
                        ArtifactContent::Descriptor { wire } => Some(wire),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        ActionError::DeploymentFailed("no deployment descriptor among the inputs".to_string())
                    })?;
                let descriptor = DeploymentDescriptor::from_wire(wire.as_bytes())
                    .map_err(ActionError::DeploymentFailed)
                    .inspect_err(|e| ctx.log_error(e.to_string()))?;

                DeploymentDriver::new(self.service_backend.clone(), spec.policy.clone())
                    .deploy(&spec.service_name, &descriptor, &ctx)
                    .await
                    .into_result()?;

                Ok(Some(ArtifactContent::Deployment {
                    service: spec.service_name.clone(),
                    image_uri: descriptor.image_uri.clone(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildRunner, RunnerOutput};
    use crate::deploy::{ProbeResult, Rollout, ServiceError};
    use crate::registry::InMemoryRegistry;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tandem_core::domain::artifact::ArtifactRef;
    use tandem_core::domain::event::{RegistryPushEvent, SourcePushEvent};
    use tandem_core::domain::health::{DeploymentPolicy, HealthCheck};
    use tandem_core::domain::image::ImageReference;
    use tandem_core::domain::pipeline::{BuildEnvironment, DeploySpec, ReleaseConfig};
    use uuid::Uuid;

    struct EchoRunner;

    #[async_trait]
    impl BuildRunner for EchoRunner {
        async fn run(
            &self,
            _workspace: &Path,
            env: &BTreeMap<String, String>,
            _ctx: &ActionContext,
        ) -> anyhow::Result<RunnerOutput> {
            Ok(RunnerOutput {
                exit_code: 0,
                stdout: format!("commit {}", env.get("COMMIT_REF").cloned().unwrap_or_default()),
                stderr: String::new(),
            })
        }
    }

    struct HealthyService;

    #[async_trait]
    impl ServiceBackend for HealthyService {
        async fn current_image(&self, _service: &str) -> Result<Option<String>, ServiceError> {
            Ok(None)
        }

        async fn start_rollout(
            &self,
            service: &str,
            descriptor: &DeploymentDescriptor,
        ) -> Result<Rollout, ServiceError> {
            Ok(Rollout {
                id: "g1".to_string(),
                service: service.to_string(),
                image_uri: descriptor.image_uri.clone(),
            })
        }

        async fn probe(&self, _rollout: &Rollout, _check: &HealthCheck) -> Result<ProbeResult, ServiceError> {
            Ok(ProbeResult::Healthy)
        }

        async fn replace_unhealthy(&self, _rollout: &Rollout) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn promote(&self, _rollout: &Rollout) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn abandon(&self, _rollout: &Rollout) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn workspace() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tandem-exec-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Dockerfile"), "FROM scratch\n").unwrap();
        dir
    }

    fn service(registry: Arc<InMemoryRegistry>) -> StandardExecutionService {
        StandardExecutionService::new(
            ArchitectureBuildJob::new(Arc::new(EchoRunner), workspace()),
            registry,
            Arc::new(HealthyService),
        )
    }

    fn action(name: &str, spec: ActionSpec) -> ActionDefinition {
        ActionDefinition {
            name: name.to_string(),
            inputs: vec![],
            output: Some(ArtifactRef::new(format!("{}-out", name))),
            spec,
        }
    }

    #[tokio::test]
    async fn test_build_passes_commit_ref() {
        let exec = service(Arc::new(InMemoryRegistry::new()));
        let ctx = ActionContext::new(Uuid::new_v4(), "build-amd64");
        let source = Artifact::new(
            ArtifactRef::trigger(),
            "trigger",
            ArtifactContent::Source(SourcePushEvent {
                branch: "prod".to_string(),
                commit_ref: "abc123".to_string(),
            }),
        );

        let output = exec
            .execute_action(
                "build",
                &action(
                    "build-amd64",
                    ActionSpec::Build(BuildEnvironment {
                        registry_uri: "registry.example/app".to_string(),
                        base_tag: "v1".to_string(),
                        platform: Platform::Amd64,
                        dockerfile_path: "Dockerfile".to_string(),
                    }),
                ),
                vec![source],
                ctx.clone(),
            )
            .await
            .unwrap();

        assert_eq!(
            output,
            Some(ArtifactContent::Image {
                image: ImageReference::new("registry.example/app", "v1-amd64"),
                platform: Platform::Amd64,
            })
        );
        assert!(ctx.drain_logs().iter().any(|l| l.message == "commit abc123"));
    }

    #[tokio::test]
    async fn test_merge_uses_input_tags() {
        let registry = Arc::new(InMemoryRegistry::new());
        for (platform, tag) in [(Platform::Amd64, "build-7-amd64"), (Platform::Arm64, "build-7-arm64")] {
            registry
                .push(&ImageReference::new("registry.example/app", tag), platform, vec![1])
                .await
                .unwrap();
        }
        let inputs = [(Platform::Amd64, "build-7-amd64"), (Platform::Arm64, "build-7-arm64")]
            .into_iter()
            .map(|(platform, tag)| {
                Artifact::new(
                    ArtifactRef::new(format!("image-{}", platform.arch())),
                    format!("build-{}", platform.arch()),
                    ArtifactContent::Image {
                        image: ImageReference::new("registry.example/app", tag),
                        platform,
                    },
                )
            })
            .collect();

        let exec = service(registry.clone());
        let output = exec
            .execute_action(
                "build",
                &action(
                    "merge",
                    ActionSpec::Merge(MergeSpec {
                        registry_uri: "registry.example/app".to_string(),
                        base_tag: "v1".to_string(),
                        container_name: "app".to_string(),
                    }),
                ),
                inputs,
                ActionContext::new(Uuid::new_v4(), "merge"),
            )
            .await
            .unwrap();

        assert!(matches!(output, Some(ArtifactContent::ManifestList { .. })));
        assert!(registry
            .resolve(&ImageReference::new("registry.example/app", "v1"), Platform::Arm64)
            .is_some());
    }

    #[tokio::test]
    async fn test_describe_requires_registry_event() {
        let exec = service(Arc::new(InMemoryRegistry::new()));
        let describe = action(
            "describe",
            ActionSpec::Describe(ReleaseConfig {
                container_name: "app".to_string(),
            }),
        );

        let err = exec
            .execute_action("release", &describe, vec![], ActionContext::new(Uuid::new_v4(), "describe"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::DescriptorBuildFailed(_)));

        let event = Artifact::new(
            ArtifactRef::trigger(),
            "trigger",
            ArtifactContent::RegistryEvent(RegistryPushEvent::default()),
        );
        let ctx = ActionContext::new(Uuid::new_v4(), "describe");
        let err = exec
            .execute_action("release", &describe, vec![event], ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::DescriptorBuildFailed(_)));
        assert!(!ctx.drain_logs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_describe_then_deploy_records_deployment() {
        let exec = service(Arc::new(InMemoryRegistry::new()));
        let event = Artifact::new(
            ArtifactRef::trigger(),
            "trigger",
            ArtifactContent::RegistryEvent(RegistryPushEvent::for_image(&ImageReference::new(
                "registry.example/app",
                "v3",
            ))),
        );
        let describe = action(
            "describe",
            ActionSpec::Describe(ReleaseConfig {
                container_name: "app".to_string(),
            }),
        );
        let content = exec
            .execute_action("release", &describe, vec![event], ActionContext::new(Uuid::new_v4(), "describe"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            content,
            ArtifactContent::Descriptor {
                wire: r#"[{"name":"app","imageUri":"registry.example/app:v3"}]"#.to_string(),
            }
        );

        let descriptor = Artifact::new(ArtifactRef::new("descriptor"), "describe", content);
        let deploy = action(
            "deploy",
            ActionSpec::Deploy(DeploySpec {
                service_name: "app".to_string(),
                policy: DeploymentPolicy {
                    grace_period: Duration::from_secs(5),
                    deployment_timeout: Duration::from_secs(120),
                    health_check: HealthCheck::default(),
                },
            }),
        );

        let output = exec
            .execute_action("release", &deploy, vec![descriptor], ActionContext::new(Uuid::new_v4(), "deploy"))
            .await
            .unwrap();

        assert_eq!(
            output,
            Some(ArtifactContent::Deployment {
                service: "app".to_string(),
                image_uri: "registry.example/app:v3".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_deploy_rejects_malformed_descriptor() {
        let exec = service(Arc::new(InMemoryRegistry::new()));
        let descriptor = Artifact::new(
            ArtifactRef::new("descriptor"),
            "describe",
            ArtifactContent::Descriptor {
                wire: r#"{"name":"app","imageUri":"registry.example/app:v3"}"#.to_string(),
            },
        );
        let deploy = action(
            "deploy",
            ActionSpec::Deploy(DeploySpec {
                service_name: "app".to_string(),
                policy: DeploymentPolicy::default(),
            }),
        );
        let ctx = ActionContext::new(Uuid::new_v4(), "deploy");

        let err = exec
            .execute_action("release", &deploy, vec![descriptor], ctx.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::DeploymentFailed(ref msg) if msg.starts_with("invalid descriptor")));
        assert!(!ctx.drain_logs().is_empty());
    }
}
