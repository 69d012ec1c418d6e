//! Multi-architecture manifest merge
//!
//! The merger is the only writer of the bare `<base-tag>`. It writes only
//! after both per-architecture tags are confirmed present, and a failed
//! merge leaves the bare tag untouched.

use std::sync::Arc;
use tandem_core::domain::image::{ImageReference, Platform, arch_tag};
use tandem_core::domain::pipeline::MergeSpec;
use tandem_core::error::ActionError;
use tracing::info;

use crate::context::ActionContext;
use crate::registry::{ContainerRegistry, RegistryError};

/// Inputs of one merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub registry_uri: String,
    pub base_tag: String,
    pub amd64_tag: String,
    pub arm64_tag: String,
}

impl MergeRequest {
    /// Request following the `<base-tag>-<arch>` convention
    pub fn for_base_tag(registry_uri: impl Into<String>, base_tag: impl Into<String>) -> Self {
        let base_tag = base_tag.into();
        Self {
            registry_uri: registry_uri.into(),
            amd64_tag: arch_tag(&base_tag, Platform::Amd64),
            arm64_tag: arch_tag(&base_tag, Platform::Arm64),
            base_tag,
        }
    }

    pub fn from_spec(spec: &MergeSpec) -> Self {
        Self::for_base_tag(spec.registry_uri.clone(), spec.base_tag.clone())
    }

    fn target(&self) -> ImageReference {
        ImageReference::new(self.registry_uri.clone(), self.base_tag.clone())
    }

    fn sources(&self) -> [(Platform, ImageReference); 2] {
        let target = self.target();
        [
            (Platform::Amd64, target.with_tag(self.amd64_tag.clone())),
            (Platform::Arm64, target.with_tag(self.arm64_tag.clone())),
        ]
    }
}

/// Combines per-architecture tags into one manifest list tag
pub struct ManifestMerger {
    registry: Arc<dyn ContainerRegistry>,
}

impl ManifestMerger {
    pub fn new(registry: Arc<dyn ContainerRegistry>) -> Self {
        Self { registry }
    }

    /// Verifies both source tags, then publishes the manifest list
    ///
    /// Returns the target reference pinned to the published digest.
    /// Re-running with the same sources overwrites the list with an
    /// equivalent one.
    pub async fn merge(
        &self,
        request: &MergeRequest,
        ctx: &ActionContext,
    ) -> Result<ImageReference, ActionError> {
        let [(amd_platform, amd_image), (arm_platform, arm_image)] = request.sources();

        let (amd_exists, arm_exists) = tokio::join!(
            self.registry.exists(&amd_image),
            self.registry.exists(&arm_image)
        );
        let amd_exists = amd_exists.map_err(|e| ActionError::Infrastructure(e.to_string()))?;
        let arm_exists = arm_exists.map_err(|e| ActionError::Infrastructure(e.to_string()))?;

        let missing: Vec<String> = [(amd_exists, &amd_image), (arm_exists, &arm_image)]
            .into_iter()
            .filter(|(exists, _)| !exists)
            .map(|(_, image)| image.to_string())
            .collect();

        if !missing.is_empty() {
            ctx.log_error(format!("Missing source tag(s): {}", missing.join(", ")));
            return Err(ActionError::MergeFailed { missing });
        }

        let target = request.target();
        ctx.log_info(format!(
            "Creating manifest list {} from {} and {}",
            target, amd_image, arm_image
        ));

        let sources = [(amd_platform, amd_image), (arm_platform, arm_image)];
        let digest = match self.registry.publish_manifest_list(&target, &sources).await {
            Ok(digest) => digest,
            // The tag exists but holds no usable single-platform image
            Err(RegistryError::NotFound(detail)) => {
                let mut missing: Vec<String> = sources
                    .iter()
                    .map(|(_, image)| image.to_string())
                    .filter(|image| detail.contains(image.as_str()))
                    .collect();
                if missing.is_empty() {
                    missing.push(detail);
                }
                ctx.log_error(format!("Unusable source tag(s): {}", missing.join(", ")));
                return Err(ActionError::MergeFailed { missing });
            }
            Err(e) => return Err(ActionError::Infrastructure(e.to_string())),
        };

        ctx.log_info(format!("Published {}@{}", target, digest));
        info!("[{}] published manifest list {}@{}", ctx.action, target, digest);

        Ok(ImageReference {
            digest: Some(digest),
            ..target
        })
    }
}
