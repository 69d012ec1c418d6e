//! Service backend running local podman containers
//!
//! The serving container is named after the service and publishes the
//! service port on the host port. A rollout starts a candidate container
//! `<service>-<rollout>` next to it, publishing the service port on a
//! loopback ephemeral port for probing.
//!
//! Promotion parks the serving container as `<service>-previous` and stops
//! it to free the host port, then starts the candidate's image under the
//! service name on the host port. The parked container is removed only once
//! its replacement is running; if the replacement cannot start, the parked
//! container is renamed back and restarted.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tandem_core::domain::descriptor::DeploymentDescriptor;
use tandem_core::domain::health::HealthCheck;
use tracing::{debug, info, warn};

use super::backend::{ProbeResult, Rollout, ServiceBackend, ServiceError};
use crate::podman::{CommandOutput, Podman};

const SERVICE_LABEL: &str = "tandem.service";
const CONTAINER_LABEL: &str = "tandem.container";

pub struct PodmanServiceBackend {
    podman: Podman,
    http: reqwest::Client,
    /// Port the service listens on inside the container
    port: u16,
    /// Host port the serving container publishes `port` on
    host_port: u16,
    generation: AtomicU64,
}

impl PodmanServiceBackend {
    pub fn new(podman: Podman, port: u16) -> Self {
        Self {
            podman,
            http: reqwest::Client::new(),
            port,
            host_port: port,
            generation: AtomicU64::new(chrono::Utc::now().timestamp_millis() as u64),
        }
    }

    pub fn with_host_port(mut self, host_port: u16) -> Self {
        self.host_port = host_port;
        self
    }

    fn candidate_name(rollout: &Rollout) -> String {
        format!("{}-{}", rollout.service, rollout.id)
    }

    fn previous_name(service: &str) -> String {
        format!("{}-previous", service)
    }

    /// `podman run` arguments for a detached, labelled container
    fn run_args(name: &str, service: &str, container: &str, publish: &str, image: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("{}={}", SERVICE_LABEL, service),
            "--label".to_string(),
            format!("{}={}", CONTAINER_LABEL, container),
            "-p".to_string(),
            publish.to_string(),
            image.to_string(),
        ]
    }

    /// Loopback ephemeral mapping used while a candidate is probed
    fn candidate_publish(&self) -> String {
        format!("127.0.0.1::{}", self.port)
    }

    /// Mapping the serving container answers on
    fn serving_publish(&self) -> String {
        format!("{}:{}", self.host_port, self.port)
    }

    async fn podman(&self, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        self.podman
            .run(args)
            .await
            .map_err(|e| ServiceError::Backend(format!("{:#}", e)))
    }

    async fn checked(&self, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        let output = self.podman(args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ServiceError::Backend(output.combined()))
        }
    }

    /// Removes a container; a missing container is not an error
    async fn remove(&self, name: &str) -> Result<(), ServiceError> {
        let removed = self.podman(&["rm", "-f", name]).await?;
        if !removed.success() && !is_missing(&removed) {
            return Err(ServiceError::Backend(removed.combined()));
        }
        Ok(())
    }

    async fn container_label(&self, name: &str) -> Result<String, ServiceError> {
        let format = format!("{{{{index .Config.Labels \"{}\"}}}}", CONTAINER_LABEL);
        let output = self.checked(&["inspect", "--format", &format, name]).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Puts the parked container back under the service name and restarts it
    async fn restore_previous(&self, service: &str) {
        let previous = Self::previous_name(service);
        if let Err(e) = self.remove(service).await {
            warn!("Failed to clear {} before restoring it: {}", service, e);
        }
        if let Err(e) = self.checked(&["rename", &previous, service]).await {
            warn!("Failed to rename {} back to {}: {}", previous, service, e);
            return;
        }
        match self.checked(&["start", service]).await {
            Ok(_) => info!("Restored previous {} container", service),
            Err(e) => warn!("Failed to restart previous {} container: {}", service, e),
        }
    }

    /// Removes candidates left behind by interrupted rollouts
    async fn remove_stale_candidates(&self, service: &str) -> Result<(), ServiceError> {
        let filter = format!("label={}={}", SERVICE_LABEL, service);
        let listed = self
            .checked(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;

        for name in listed.stdout.lines().map(str::trim) {
            if name.is_empty() || name == service || name == Self::previous_name(service) {
                continue;
            }
            debug!("Removing stale candidate container {}", name);
            self.checked(&["rm", "-f", name]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceBackend for PodmanServiceBackend {
    async fn current_image(&self, service: &str) -> Result<Option<String>, ServiceError> {
        let output = self
            .podman(&["inspect", "--type", "container", "--format", "{{.ImageName}}", service])
            .await?;

        if output.success() {
            Ok(Some(output.stdout.trim().to_string()))
        } else if is_missing(&output) {
            Ok(None)
        } else {
            Err(ServiceError::Backend(output.combined()))
        }
    }

    async fn start_rollout(
        &self,
        service: &str,
        descriptor: &DeploymentDescriptor,
    ) -> Result<Rollout, ServiceError> {
        self.remove_stale_candidates(service).await?;

        let rollout = Rollout {
            id: format!("g{}", self.generation.fetch_add(1, Ordering::SeqCst)),
            service: service.to_string(),
            image_uri: descriptor.image_uri.clone(),
        };

        let name = Self::candidate_name(&rollout);
        let args = Self::run_args(
            &name,
            service,
            &descriptor.container_name,
            &self.candidate_publish(),
            &descriptor.image_uri,
        );
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.checked(&args).await?;

        info!("Started candidate {} from {}", name, descriptor.image_uri);
        Ok(rollout)
    }

    async fn probe(&self, rollout: &Rollout, check: &HealthCheck) -> Result<ProbeResult, ServiceError> {
        let name = Self::candidate_name(rollout);

        let state = self
            .podman(&["inspect", "--format", "{{.State.Status}} {{.State.ExitCode}}", &name])
            .await?;
        if !state.success() {
            return if is_missing(&state) {
                Ok(ProbeResult::Exited(format!("container {} is gone", name)))
            } else {
                Err(ServiceError::Backend(state.combined()))
            };
        }
        let state = state.stdout.trim();
        if !state.starts_with("running") {
            return Ok(ProbeResult::Exited(state.to_string()));
        }

        let port_spec = format!("{}/tcp", self.port);
        let mapping = self.checked(&["port", &name, &port_spec]).await?;
        let Some(address) = parse_port_mapping(&mapping.stdout) else {
            return Ok(ProbeResult::Unhealthy("port not published yet".to_string()));
        };

        let url = format!("http://{}{}", address, check.path);
        match self.http.get(&url).timeout(check.timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if check.is_healthy_status(status) {
                    Ok(ProbeResult::Healthy)
                } else {
                    Ok(ProbeResult::Unhealthy(format!("HTTP {} from {}", status, url)))
                }
            }
            Err(e) => Ok(ProbeResult::Unhealthy(e.to_string())),
        }
    }

    async fn replace_unhealthy(&self, rollout: &Rollout) -> Result<(), ServiceError> {
        let name = Self::candidate_name(rollout);
        self.checked(&["restart", &name]).await?;
        Ok(())
    }

    async fn promote(&self, rollout: &Rollout) -> Result<(), ServiceError> {
        let service = rollout.service.as_str();
        let candidate = Self::candidate_name(rollout);
        let previous = Self::previous_name(service);
        let container = self.container_label(&candidate).await?;

        let parked = self.current_image(service).await?.is_some();
        if parked {
            self.remove(&previous).await?;
            self.checked(&["rename", service, &previous]).await?;
            if let Err(e) = self.checked(&["stop", &previous]).await {
                self.restore_previous(service).await;
                return Err(e);
            }
        }

        let args = Self::run_args(
            service,
            service,
            &container,
            &self.serving_publish(),
            &rollout.image_uri,
        );
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        if let Err(e) = self.checked(&args).await {
            warn!("Promoted {} did not start: {}", service, e);
            if parked {
                self.restore_previous(service).await;
            }
            return Err(e);
        }

        if parked {
            if let Err(e) = self.remove(&previous).await {
                warn!("Failed to remove retired container {}: {}", previous, e);
            }
        }
        if let Err(e) = self.remove(&candidate).await {
            warn!("Failed to remove candidate {}: {}", candidate, e);
        }
        info!("Promoted {} to serve {} on port {}", rollout.image_uri, service, self.host_port);
        Ok(())
    }

    async fn abandon(&self, rollout: &Rollout) -> Result<(), ServiceError> {
        let name = Self::candidate_name(rollout);
        self.remove(&name).await?;
        info!("Abandoned candidate {}", name);
        Ok(())
    }
}

fn is_missing(output: &CommandOutput) -> bool {
    let text = output.combined().to_lowercase();
    text.contains("no such container") || text.contains("no such object")
}

/// First `host:port` line of `podman port` output
fn parse_port_mapping(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()))
        .map(|line| line.replace("0.0.0.0", "127.0.0.1"))
}
