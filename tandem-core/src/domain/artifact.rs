//! Artifact types
//!
//! Artifacts are produced by one action and consumed by the actions of the
//! next stage. Identity is the reference handle; content is write-once.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::descriptor::DeploymentDescriptor;
use crate::domain::event::{RegistryPushEvent, SourcePushEvent};
use crate::domain::image::{ImageReference, Platform};

/// Handle of the artifact carrying the trigger event into the first stage
pub const TRIGGER_ARTIFACT: &str = "trigger";

/// Reference handle naming an artifact within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn trigger() -> Self {
        Self::new(TRIGGER_ARTIFACT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// What an artifact holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactContent {
    /// Source revision that triggered a build run
    Source(SourcePushEvent),
    /// Registry notification that triggered a release run
    RegistryEvent(RegistryPushEvent),
    /// Per-architecture image pushed by a build
    Image {
        image: ImageReference,
        platform: Platform,
    },
    /// Multi-architecture manifest list published by a merge
    ManifestList {
        image: ImageReference,
        platforms: Vec<Platform>,
    },
    /// Deployment descriptor derived from a registry event, kept in its
    /// single-element list wire format
    Descriptor { wire: String },
    /// Record of a converged rollout
    Deployment { service: String, image_uri: String },
}

impl ArtifactContent {
    pub fn descriptor(descriptor: &DeploymentDescriptor) -> serde_json::Result<Self> {
        Ok(ArtifactContent::Descriptor {
            wire: descriptor.to_wire()?,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactContent::Source(_) => "source",
            ArtifactContent::RegistryEvent(_) => "registry_event",
            ArtifactContent::Image { .. } => "image",
            ArtifactContent::ManifestList { .. } => "manifest_list",
            ArtifactContent::Descriptor { .. } => "descriptor",
            ArtifactContent::Deployment { .. } => "deployment",
        }
    }
}

/// An immutable artifact published into a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub reference: ArtifactRef,
    /// Name of the producing action, or `trigger`
    pub produced_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub content: ArtifactContent,
}

impl Artifact {
    pub fn new(reference: ArtifactRef, produced_by: impl Into<String>, content: ArtifactContent) -> Self {
        Self {
            reference,
            produced_by: produced_by.into(),
            created_at: chrono::Utc::now(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_content_carries_wire_format() {
        let content = ArtifactContent::descriptor(&DeploymentDescriptor {
            container_name: "app".to_string(),
            image_uri: "registry.example/app:v3".to_string(),
        })
        .unwrap();

        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["kind"], "descriptor");
        assert_eq!(
            json["wire"],
            r#"[{"name":"app","imageUri":"registry.example/app:v3"}]"#
        );
    }
}
