//! Health check and rollout policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Readiness probe applied to newly started service instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// HTTP path probed on each new instance
    pub path: String,
    /// Lowest status code counted as healthy
    pub healthy_status_min: u16,
    /// Highest status code counted as healthy
    pub healthy_status_max: u16,
    /// Time between probes
    pub interval: Duration,
    /// Time a single probe may take before it counts as a failure
    pub timeout: Duration,
    /// Consecutive passing probes before an instance is healthy
    pub healthy_threshold: u32,
    /// Consecutive failing probes before an instance is unhealthy
    pub unhealthy_threshold: u32,
}

impl HealthCheck {
    pub fn is_healthy_status(&self, status: u16) -> bool {
        (self.healthy_status_min..=self.healthy_status_max).contains(&status)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err(format!("health check path '{}' must start with '/'", self.path));
        }
        if self.healthy_status_min > self.healthy_status_max {
            return Err("healthy status range is empty".to_string());
        }
        if self.healthy_threshold == 0 || self.unhealthy_threshold == 0 {
            return Err("health check thresholds must be greater than 0".to_string());
        }
        if self.interval.is_zero() {
            return Err("health check interval must be greater than 0".to_string());
        }
        if self.timeout >= self.interval {
            return Err("health check timeout must be shorter than the interval".to_string());
        }
        Ok(())
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            healthy_status_min: 200,
            healthy_status_max: 299,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

/// Timing bounds for a single rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPolicy {
    /// New instances are not evaluated for health during this window
    pub grace_period: Duration,
    /// A rollout that has not converged by then is declared timed out
    pub deployment_timeout: Duration,
    pub health_check: HealthCheck,
}

impl DeploymentPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.deployment_timeout.is_zero() {
            return Err("deployment timeout must be greater than 0".to_string());
        }
        if self.grace_period >= self.deployment_timeout {
            return Err("grace period must be shorter than the deployment timeout".to_string());
        }
        self.health_check.validate()
    }
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(120),
            deployment_timeout: Duration::from_secs(900),
            health_check: HealthCheck::default(),
        }
    }
}
