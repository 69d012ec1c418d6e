//! Deployable service contract

use async_trait::async_trait;
use tandem_core::domain::descriptor::DeploymentDescriptor;
use tandem_core::domain::health::HealthCheck;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service not found: {0}")]
    NotFound(String),

    #[error("service backend error: {0}")]
    Backend(String),
}

/// Handle on a rollout in progress
///
/// The new generation runs alongside the serving one until it is promoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollout {
    pub id: String,
    pub service: String,
    pub image_uri: String,
}

/// Result of a single readiness probe against the new generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Healthy,
    Unhealthy(String),
    /// The instance stopped; probing it again cannot succeed
    Exited(String),
}

/// A running service that can be rolled onto a new image
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Image currently serving traffic, if the service is running
    async fn current_image(&self, service: &str) -> Result<Option<String>, ServiceError>;

    /// Starts new-generation instances for `descriptor` next to the serving ones
    async fn start_rollout(
        &self,
        service: &str,
        descriptor: &DeploymentDescriptor,
    ) -> Result<Rollout, ServiceError>;

    /// Probes the new generation once
    async fn probe(&self, rollout: &Rollout, check: &HealthCheck) -> Result<ProbeResult, ServiceError>;

    /// Replaces new-generation instances that crossed the unhealthy threshold
    async fn replace_unhealthy(&self, rollout: &Rollout) -> Result<(), ServiceError>;

    /// Makes the new generation serve traffic and retires the old one
    async fn promote(&self, rollout: &Rollout) -> Result<(), ServiceError>;

    /// Stops the new generation; the old one keeps serving
    async fn abandon(&self, rollout: &Rollout) -> Result<(), ServiceError>;
}
