//! Test doubles shared by the dispatcher and API tests

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::domain::artifact::{Artifact, ArtifactContent};
use tandem_core::domain::descriptor::DeploymentDescriptor;
use tandem_core::domain::image::Platform;
use tandem_core::domain::pipeline::{ActionDefinition, ActionSpec};
use tandem_core::error::ActionError;
use tandem_runner::context::ActionContext;
use tandem_runner::service::ExecutionService;

use crate::config::OrchestratorConfig;
use crate::controller::PipelineController;
use crate::dispatcher::Dispatcher;
use crate::pipelines::{build_pipeline, release_pipeline};
use crate::repository::InMemoryRunRepository;

/// Succeeds every action after `delay`, producing the artifact its kind implies
///
/// A cancelled action stops waiting and reports `Cancelled`.
pub struct StubExecutor {
    pub delay: Duration,
}

#[async_trait]
impl ExecutionService for StubExecutor {
    async fn execute_action(
        &self,
        _pipeline: &str,
        action: &ActionDefinition,
        _inputs: Vec<Artifact>,
        ctx: Arc<ActionContext>,
    ) -> Result<Option<ArtifactContent>, ActionError> {
        ctx.log_info(format!("{} started", action.name));
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = ctx.cancelled() => return Err(ActionError::Cancelled),
        }

        Ok(Some(match &action.spec {
            ActionSpec::Build(env) => ArtifactContent::Image {
                image: env.image(),
                platform: env.platform,
            },
            ActionSpec::Merge(spec) => ArtifactContent::ManifestList {
                image: spec.target(),
                platforms: Platform::ALL.to_vec(),
            },
            ActionSpec::Describe(release) => ArtifactContent::descriptor(&DeploymentDescriptor {
                container_name: release.container_name.clone(),
                image_uri: "registry.example/app:latest".to_string(),
            })
            .map_err(|e| ActionError::DescriptorBuildFailed(e.to_string()))?,
            ActionSpec::Deploy(spec) => ArtifactContent::Deployment {
                service: spec.service_name.clone(),
                image_uri: "registry.example/app:latest".to_string(),
            },
        }))
    }
}

/// Dispatcher over the standard pipelines backed by `StubExecutor`
pub fn dispatcher(delay: Duration) -> (Arc<Dispatcher>, Arc<InMemoryRunRepository>) {
    let config = OrchestratorConfig::new("registry.example/app");
    let executor = Arc::new(StubExecutor { delay });
    let repository = Arc::new(InMemoryRunRepository::new());

    let controllers = vec![
        PipelineController::new(build_pipeline(&config), executor.clone(), repository.clone())
            .unwrap(),
        PipelineController::new(release_pipeline(&config), executor, repository.clone()).unwrap(),
    ];

    (
        Arc::new(Dispatcher::new(controllers, repository.clone())),
        repository,
    )
}
