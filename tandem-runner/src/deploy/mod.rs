//! Health-gated deployment
//!
//! `DeploymentDriver` rolls a service onto the image named by a deployment
//! descriptor:
//!
//! ```text
//! Pending -> RollingOut -> Succeeded | TimedOut | Failed
//! ```
//!
//! New instances get a grace period before they are probed. The rollout
//! converges once `healthy_threshold` consecutive probes pass; instances
//! failing `unhealthy_threshold` consecutive probes are replaced. A rollout
//! that has not converged by the deployment timeout is abandoned and the
//! previous generation keeps serving. There is no automatic rollback.
//!
//! Cancelling the action context abandons a rollout that has not converged
//! yet. Promotion itself is never interrupted.

mod backend;
mod podman;

pub use backend::{ProbeResult, Rollout, ServiceBackend, ServiceError};
pub use podman::PodmanServiceBackend;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::domain::descriptor::DeploymentDescriptor;
use tandem_core::domain::health::DeploymentPolicy;
use tandem_core::error::ActionError;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::context::ActionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentState {
    Pending,
    RollingOut,
    Succeeded,
    TimedOut,
    Failed,
    Cancelled,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Succeeded
                | DeploymentState::TimedOut
                | DeploymentState::Failed
                | DeploymentState::Cancelled
        )
    }
}

/// Terminal result of a rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOutcome {
    pub state: DeploymentState,
    pub elapsed: Duration,
    pub detail: Option<String>,
}

impl DeploymentOutcome {
    pub fn into_result(self) -> Result<(), ActionError> {
        match self.state {
            DeploymentState::Succeeded => Ok(()),
            DeploymentState::TimedOut => Err(ActionError::DeploymentTimedOut {
                elapsed: self.elapsed,
            }),
            DeploymentState::Cancelled => Err(ActionError::Cancelled),
            _ => Err(ActionError::DeploymentFailed(
                self.detail
                    .unwrap_or_else(|| "rollout did not complete".to_string()),
            )),
        }
    }
}

pub struct DeploymentDriver {
    backend: Arc<dyn ServiceBackend>,
    policy: DeploymentPolicy,
}

impl DeploymentDriver {
    pub fn new(backend: Arc<dyn ServiceBackend>, policy: DeploymentPolicy) -> Self {
        Self { backend, policy }
    }

    /// Rolls `service` onto `descriptor` and blocks until a terminal state
    pub async fn deploy(
        &self,
        service: &str,
        descriptor: &DeploymentDescriptor,
        ctx: &ActionContext,
    ) -> DeploymentOutcome {
        let started = Instant::now();
        let deadline = started + self.policy.deployment_timeout;

        match self.backend.current_image(service).await {
            Ok(Some(image)) => ctx.log_info(format!("{} is serving {}", service, image)),
            Ok(None) => ctx.log_info(format!("{} has no serving instances", service)),
            Err(e) => ctx.log_warning(format!("Could not read current image: {}", e)),
        }
        self.transition(ctx, DeploymentState::Pending);

        let rollout = match self.backend.start_rollout(service, descriptor).await {
            Ok(rollout) => rollout,
            Err(e) => {
                return self.finish(ctx, started, DeploymentState::Failed, Some(e.to_string()));
            }
        };
        ctx.log_info(format!(
            "Rollout {} started: {} -> {}",
            rollout.id, descriptor.container_name, descriptor.image_uri
        ));
        self.transition(ctx, DeploymentState::RollingOut);

        let converged = tokio::select! {
            converged = tokio::time::timeout_at(deadline, self.converge(&rollout, ctx)) => converged,
            _ = ctx.cancelled() => {
                ctx.log_warning(format!("Cancelled, stopping rollout {}", rollout.id));
                self.abandon(&rollout, ctx).await;
                let detail = "cancelled before the rollout converged".to_string();
                return self.finish(ctx, started, DeploymentState::Cancelled, Some(detail));
            }
        };

        match converged {
            Ok(Ok(())) => match self.backend.promote(&rollout).await {
                Ok(()) => self.finish(ctx, started, DeploymentState::Succeeded, None),
                Err(e) => {
                    self.abandon(&rollout, ctx).await;
                    self.finish(ctx, started, DeploymentState::Failed, Some(e.to_string()))
                }
            },
            Ok(Err(detail)) => {
                self.abandon(&rollout, ctx).await;
                self.finish(ctx, started, DeploymentState::Failed, Some(detail))
            }
            Err(_) => {
                self.abandon(&rollout, ctx).await;
                let detail = format!(
                    "no healthy convergence within {}s",
                    self.policy.deployment_timeout.as_secs()
                );
                self.finish(ctx, started, DeploymentState::TimedOut, Some(detail))
            }
        }
    }

    /// Probes until the healthy threshold is met; `Err` on a fatal failure
    async fn converge(&self, rollout: &Rollout, ctx: &ActionContext) -> Result<(), String> {
        let check = &self.policy.health_check;
        let mut successes = 0u32;
        let mut failures = 0u32;

        ctx.log_debug(format!(
            "Waiting {}s grace period",
            self.policy.grace_period.as_secs()
        ));
        tokio::time::sleep(self.policy.grace_period).await;

        loop {
            let probe = tokio::time::timeout(check.timeout, self.backend.probe(rollout, check)).await;

            let failure = match probe {
                Ok(Ok(ProbeResult::Healthy)) => None,
                Ok(Ok(ProbeResult::Unhealthy(reason))) => Some(reason),
                Ok(Ok(ProbeResult::Exited(reason))) => {
                    return Err(format!("new instance exited: {}", reason));
                }
                Ok(Err(e)) => return Err(e.to_string()),
                Err(_) => Some(format!("probe timed out after {}s", check.timeout.as_secs())),
            };

            match failure {
                None => {
                    successes += 1;
                    failures = 0;
                    ctx.log_debug(format!(
                        "Health check passed ({}/{})",
                        successes, check.healthy_threshold
                    ));
                    if successes >= check.healthy_threshold {
                        return Ok(());
                    }
                }
                Some(reason) => {
                    successes = 0;
                    failures += 1;
                    ctx.log_warning(format!(
                        "Health check failed ({}/{}): {}",
                        failures, check.unhealthy_threshold, reason
                    ));
                    if failures >= check.unhealthy_threshold {
                        ctx.log_warning("Replacing unhealthy instances");
                        self.backend
                            .replace_unhealthy(rollout)
                            .await
                            .map_err(|e| e.to_string())?;
                        failures = 0;
                        tokio::time::sleep(self.policy.grace_period).await;
                        continue;
                    }
                }
            }

            tokio::time::sleep(check.interval).await;
        }
    }

    async fn abandon(&self, rollout: &Rollout, ctx: &ActionContext) {
        if let Err(e) = self.backend.abandon(rollout).await {
            warn!("[{}] failed to stop rollout {}: {}", ctx.action, rollout.id, e);
            ctx.log_warning(format!("Failed to stop rollout {}: {}", rollout.id, e));
        }
    }

    fn transition(&self, ctx: &ActionContext, state: DeploymentState) {
        ctx.log_info(format!("Deployment state: {:?}", state));
    }

    fn finish(
        &self,
        ctx: &ActionContext,
        started: Instant,
        state: DeploymentState,
        detail: Option<String>,
    ) -> DeploymentOutcome {
        let elapsed = started.elapsed();
        self.transition(ctx, state);
        if let Some(detail) = &detail {
            ctx.log_error(detail.clone());
        }
        info!(
            "[{}] deployment finished as {:?} after {}s",
            ctx.action,
            state,
            elapsed.as_secs()
        );
        DeploymentOutcome {
            state,
            elapsed,
            detail,
        }
    }
}
