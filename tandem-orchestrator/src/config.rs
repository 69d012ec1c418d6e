//! Orchestrator configuration
//!
//! Every fixed name and default tag the pipelines use is read here once and
//! injected into the pipeline definitions.

use anyhow::{Context, Result};
use std::time::Duration;
use tandem_core::domain::health::{DeploymentPolicy, HealthCheck};
use tandem_core::domain::image::{ImageReference, is_valid_tag};
use tandem_runner::config::RunnerConfig;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// Postgres URL for run audit storage; runs are kept in memory when unset
    pub database_url: Option<String>,

    /// Repository the per-architecture images and the manifest list go to
    pub registry_uri: String,

    /// Base image tag; architecture tags are derived from it
    pub image_tag: String,

    /// Source branch whose pushes start the build pipeline
    pub branch: String,

    pub dockerfile_path: String,

    /// Container name written into deployment descriptors
    pub container_name: String,

    pub service_name: String,
    /// Port the service listens on inside its container
    pub service_port: u16,
    /// Host port the serving container is published on
    pub service_host_port: u16,

    /// Registry tags that start the release pipeline (glob)
    pub release_tag_pattern: String,

    pub deployment_policy: DeploymentPolicy,

    pub runner: RunnerConfig,
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults for the given repository
    pub fn new(registry_uri: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            registry_uri: registry_uri.into(),
            image_tag: "latest".to_string(),
            branch: "prod".to_string(),
            dockerfile_path: "Dockerfile".to_string(),
            container_name: "app".to_string(),
            service_name: "app".to_string(),
            service_port: 8000,
            service_host_port: 8000,
            release_tag_pattern: "latest".to_string(),
            deployment_policy: DeploymentPolicy::default(),
            runner: RunnerConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - REPOSITORY_URI (required)
    /// - TANDEM_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - DATABASE_URL (optional)
    /// - IMAGE_TAG (optional, default: latest)
    /// - BRANCH_NAME (optional, default: prod)
    /// - PATH_TO_DOCKERFILE (optional, default: Dockerfile)
    /// - CONTAINER_NAME, SERVICE_NAME (optional, default: app)
    /// - SERVICE_PORT (optional, default: 8000)
    /// - SERVICE_HOST_PORT (optional, default: SERVICE_PORT)
    /// - RELEASE_TAG_PATTERN (optional, default: IMAGE_TAG)
    /// - HEALTH_CHECK_PATH, HEALTH_CHECK_INTERVAL, HEALTH_CHECK_TIMEOUT,
    ///   HEALTHY_THRESHOLD, UNHEALTHY_THRESHOLD, HEALTH_CHECK_GRACE_PERIOD,
    ///   DEPLOYMENT_TIMEOUT (optional, seconds where applicable)
    /// - WORKSPACE_DIR, BUILD_COMMAND, PODMAN_BIN (see `RunnerConfig`)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.runner = RunnerConfig::from_env()?;
        Ok(config)
    }

    /// Builds the configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let registry_uri = var("REPOSITORY_URI")
            .ok_or_else(|| anyhow::anyhow!("REPOSITORY_URI environment variable not set"))?;

        let mut config = Self::new(registry_uri);

        if let Some(addr) = var("TANDEM_BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.database_url = var("DATABASE_URL");
        if let Some(tag) = var("IMAGE_TAG") {
            config.image_tag = tag;
        }
        if let Some(branch) = var("BRANCH_NAME") {
            config.branch = branch;
        }
        if let Some(path) = var("PATH_TO_DOCKERFILE") {
            config.dockerfile_path = path;
        }
        if let Some(name) = var("CONTAINER_NAME") {
            config.container_name = name;
        }
        if let Some(name) = var("SERVICE_NAME") {
            config.service_name = name;
        }
        if let Some(port) = var("SERVICE_PORT") {
            config.service_port = port
                .parse()
                .with_context(|| format!("SERVICE_PORT '{}' is not a port number", port))?;
        }
        config.service_host_port = match var("SERVICE_HOST_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("SERVICE_HOST_PORT '{}' is not a port number", port))?,
            None => config.service_port,
        };
        config.release_tag_pattern =
            var("RELEASE_TAG_PATTERN").unwrap_or_else(|| config.image_tag.clone());

        let secs = |key: &str| -> Result<Option<Duration>> {
            var(key)
                .map(|v| {
                    v.parse::<u64>()
                        .map(Duration::from_secs)
                        .with_context(|| format!("{} must be a number of seconds", key))
                })
                .transpose()
        };
        let count = |key: &str| -> Result<Option<u32>> {
            var(key)
                .map(|v| v.parse::<u32>().with_context(|| format!("{} must be a number", key)))
                .transpose()
        };

        let defaults = HealthCheck::default();
        let health_check = HealthCheck {
            path: var("HEALTH_CHECK_PATH").unwrap_or(defaults.path),
            interval: secs("HEALTH_CHECK_INTERVAL")?.unwrap_or(defaults.interval),
            timeout: secs("HEALTH_CHECK_TIMEOUT")?.unwrap_or(defaults.timeout),
            healthy_threshold: count("HEALTHY_THRESHOLD")?.unwrap_or(defaults.healthy_threshold),
            unhealthy_threshold: count("UNHEALTHY_THRESHOLD")?
                .unwrap_or(defaults.unhealthy_threshold),
            ..defaults
        };

        let policy = DeploymentPolicy::default();
        config.deployment_policy = DeploymentPolicy {
            grace_period: secs("HEALTH_CHECK_GRACE_PERIOD")?.unwrap_or(policy.grace_period),
            deployment_timeout: secs("DEPLOYMENT_TIMEOUT")?.unwrap_or(policy.deployment_timeout),
            health_check,
        };

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if ImageReference::parse(&format!("{}:{}", self.registry_uri, self.image_tag)).is_none() {
            anyhow::bail!(
                "'{}:{}' is not a valid image reference",
                self.registry_uri,
                self.image_tag
            );
        }

        if !is_valid_tag(&self.image_tag) {
            anyhow::bail!("IMAGE_TAG '{}' is not a valid tag", self.image_tag);
        }

        if self.branch.is_empty() {
            anyhow::bail!("branch cannot be empty");
        }

        if self.container_name.is_empty() || self.service_name.is_empty() {
            anyhow::bail!("container and service names cannot be empty");
        }

        if self.service_port == 0 || self.service_host_port == 0 {
            anyhow::bail!("service ports must be greater than 0");
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("DATABASE_URL must be a postgres:// URL");
            }
        }

        self.deployment_policy
            .health_check
            .validate()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.deployment_policy
            .validate()
            .map_err(|e| anyhow::anyhow!(e))?;

        self.runner.validate()
    }
}
