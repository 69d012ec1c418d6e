//! Registry backed by the podman CLI
//!
//! Talks to a real OCI registry through podman. Credentials come from the
//! podman auth file; this backend never handles them directly.

use async_trait::async_trait;
use std::path::PathBuf;
use tandem_core::domain::image::{ImageReference, Platform};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ContainerRegistry, RegistryError};
use crate::podman::{CommandOutput, Podman};

pub struct PodmanRegistry {
    podman: Podman,
    scratch_dir: PathBuf,
}

impl PodmanRegistry {
    pub fn new(podman: Podman) -> Self {
        Self {
            podman,
            scratch_dir: std::env::temp_dir(),
        }
    }

    fn scratch_file(&self, suffix: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("tandem-{}.{}", Uuid::new_v4(), suffix))
    }

    async fn podman(&self, args: &[&str]) -> Result<CommandOutput, RegistryError> {
        self.podman
            .run(args)
            .await
            .map_err(|e| RegistryError::Unavailable(format!("{:#}", e)))
    }

    async fn checked(&self, args: &[&str]) -> Result<CommandOutput, RegistryError> {
        let output = self.podman(args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify(&output))
        }
    }

    async fn read_digest(&self, path: &PathBuf) -> Result<String, RegistryError> {
        let digest = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RegistryError::Unavailable(format!("missing digest file: {}", e)))?;
        let _ = tokio::fs::remove_file(path).await;
        Ok(digest.trim().to_string())
    }
}

#[async_trait]
impl ContainerRegistry for PodmanRegistry {
    async fn push(
        &self,
        image: &ImageReference,
        platform: Platform,
        bytes: Vec<u8>,
    ) -> Result<String, RegistryError> {
        let archive = self.scratch_file("tar");
        tokio::fs::write(&archive, bytes)
            .await
            .map_err(|e| RegistryError::Unavailable(format!("cannot stage image archive: {}", e)))?;
        let archive_str = archive.to_string_lossy().to_string();

        let loaded = self.checked(&["load", "-i", &archive_str]).await;
        let _ = tokio::fs::remove_file(&archive).await;
        let loaded = loaded?;

        let source = loaded
            .stdout
            .lines()
            .filter_map(|l| l.split_once(": ").map(|(_, name)| name.trim().to_string()))
            .next_back()
            .ok_or_else(|| {
                RegistryError::Unavailable(format!(
                    "podman load did not report an image: {}",
                    loaded.combined()
                ))
            })?;

        let target = image.to_string();
        self.checked(&["tag", &source, &target]).await?;

        let digest_file = self.scratch_file("digest");
        let digest_str = digest_file.to_string_lossy().to_string();
        self.checked(&["push", "--digestfile", &digest_str, &target])
            .await?;

        let digest = self.read_digest(&digest_file).await?;
        info!("Pushed {} ({}) as {}", target, platform, digest);
        Ok(digest)
    }

    async fn exists(&self, image: &ImageReference) -> Result<bool, RegistryError> {
        let reference = format!("docker://{}", image);
        let output = self
            .podman(&["manifest", "inspect", &reference])
            .await?;

        if output.success() {
            return Ok(true);
        }

        match classify(&output) {
            RegistryError::NotFound(_) => Ok(false),
            other => Err(other),
        }
    }

    async fn pull(&self, image: &ImageReference) -> Result<Vec<u8>, RegistryError> {
        let reference = image.to_string();
        self.checked(&["pull", "--quiet", &reference]).await?;

        let archive = self.scratch_file("tar");
        let archive_str = archive.to_string_lossy().to_string();
        self.checked(&["save", "-o", &archive_str, &reference])
            .await?;

        let bytes = tokio::fs::read(&archive)
            .await
            .map_err(|e| RegistryError::Unavailable(format!("cannot read saved image: {}", e)))?;
        let _ = tokio::fs::remove_file(&archive).await;
        Ok(bytes)
    }

    async fn publish_manifest_list(
        &self,
        target: &ImageReference,
        sources: &[(Platform, ImageReference)],
    ) -> Result<String, RegistryError> {
        let list = target.to_string();

        // A stale local list from an earlier merge would otherwise accumulate entries
        if self.podman(&["manifest", "rm", &list]).await?.success() {
            debug!("Removed stale local manifest list {}", list);
        }

        self.checked(&["manifest", "create", &list]).await?;

        for (platform, source) in sources {
            let source_ref = format!("docker://{}", source);
            self.checked(&[
                "manifest",
                "add",
                "--os",
                "linux",
                "--arch",
                platform.arch(),
                &list,
                &source_ref,
            ])
            .await?;
        }

        let digest_file = self.scratch_file("digest");
        let digest_str = digest_file.to_string_lossy().to_string();
        let destination = format!("docker://{}", list);
        self.checked(&[
            "manifest",
            "push",
            "--all",
            "--digestfile",
            &digest_str,
            &list,
            &destination,
        ])
        .await?;

        let digest = self.read_digest(&digest_file).await?;
        info!("Published manifest list {} as {}", list, digest);
        Ok(digest)
    }
}

/// Maps podman's stderr onto a registry error kind
fn classify(output: &CommandOutput) -> RegistryError {
    let text = output.combined();
    let lower = text.to_lowercase();

    if ["manifest unknown", "not found", "no such image", "name unknown"]
        .iter()
        .any(|m| lower.contains(m))
    {
        RegistryError::NotFound(text)
    } else if ["unauthorized", "denied", "authentication required", "403"]
        .iter()
        .any(|m| lower.contains(m))
    {
        RegistryError::Rejected(text)
    } else {
        warn!("podman registry command failed: {}", text);
        RegistryError::Unavailable(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: 125,
        }
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify(&failed(
            "Error: reading image \"docker://registry.example/app:v1-arm64\": manifest unknown",
        ));
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn test_classify_rejected() {
        let err = classify(&failed("Error: denied: requested access to the resource is denied"));
        assert!(matches!(err, RegistryError::Rejected(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = classify(&failed("Error: dial tcp: connection refused"));
        assert!(matches!(err, RegistryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let registry = PodmanRegistry::new(Podman::new("/nonexistent/podman-binary"));
        let err = registry
            .exists(&ImageReference::new("registry.example/app", "v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)));
    }
}
