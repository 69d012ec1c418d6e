//! Container registry collaborator
//!
//! The registry is a shared, externally synchronized resource. Concurrent
//! pushes of distinct tags are safe; the manifest list tag is written only by
//! the manifest merger.

mod memory;
mod podman;

pub use memory::InMemoryRegistry;
pub use podman::PodmanRegistry;

use async_trait::async_trait;
use tandem_core::domain::event::RegistryPushEvent;
use tandem_core::domain::image::{ImageReference, Platform};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors returned by a registry backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("image not found: {0}")]
    NotFound(String),

    /// Authentication or permission failure
    #[error("registry rejected the request: {0}")]
    Rejected(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Operations the pipeline needs from a container registry
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// Stores an image archive under `image` and returns its digest
    async fn push(
        &self,
        image: &ImageReference,
        platform: Platform,
        bytes: Vec<u8>,
    ) -> Result<String, RegistryError>;

    /// Whether `image` resolves in the registry
    async fn exists(&self, image: &ImageReference) -> Result<bool, RegistryError>;

    /// Fetches the image archive stored under `image`
    async fn pull(&self, image: &ImageReference) -> Result<Vec<u8>, RegistryError>;

    /// Writes (or overwrites) a manifest list at `target` that resolves to
    /// each source image on its platform; returns the list digest
    async fn publish_manifest_list(
        &self,
        target: &ImageReference,
        sources: &[(Platform, ImageReference)],
    ) -> Result<String, RegistryError>;

    /// Push notification stream, when the backend can produce one
    fn subscribe(&self) -> Option<broadcast::Receiver<RegistryPushEvent>> {
        None
    }
}
