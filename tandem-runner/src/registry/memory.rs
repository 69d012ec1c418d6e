//! In-memory registry
//!
//! Keeps images and manifest lists in process memory and emits push
//! notifications on a broadcast channel. Used for tests and local dry runs.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use tandem_core::domain::event::RegistryPushEvent;
use tandem_core::domain::image::{ImageReference, Platform};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ContainerRegistry, RegistryError};

#[derive(Debug, Clone)]
struct StoredImage {
    platform: Platform,
    digest: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
enum Entry {
    Image(StoredImage),
    ManifestList {
        digest: String,
        entries: BTreeMap<Platform, String>,
    },
}

/// Registry held entirely in memory
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    /// Repositories that reject pushes, to simulate permission failures
    read_only: RwLock<HashSet<String>>,
    notifications: broadcast::Sender<RegistryPushEvent>,
    writes: RwLock<HashMap<String, usize>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(HashMap::new()),
            read_only: RwLock::new(HashSet::new()),
            notifications,
            writes: RwLock::new(HashMap::new()),
        }
    }

    /// Makes every push to `repository` fail with `Rejected`
    pub fn deny_pushes(&self, repository: &str) {
        self.read_only
            .write()
            .unwrap()
            .insert(repository.trim_end_matches('/').to_string());
    }

    /// Digest a client on `platform` would pull for `image`
    pub fn resolve(&self, image: &ImageReference, platform: Platform) -> Option<String> {
        let entries = self.entries.read().unwrap();
        match entries.get(&key(image))? {
            Entry::Image(stored) if stored.platform == platform => Some(stored.digest.clone()),
            Entry::Image(_) => None,
            Entry::ManifestList { entries, .. } => entries.get(&platform).cloned(),
        }
    }

    /// Platforms listed by the manifest list at `image`, if it is one
    pub fn manifest_platforms(&self, image: &ImageReference) -> Option<Vec<Platform>> {
        match self.entries.read().unwrap().get(&key(image))? {
            Entry::ManifestList { entries, .. } => Some(entries.keys().copied().collect()),
            Entry::Image(_) => None,
        }
    }

    /// Number of writes made to `image` (pushes or manifest publications)
    pub fn write_count(&self, image: &ImageReference) -> usize {
        self.writes
            .read()
            .unwrap()
            .get(&key(image))
            .copied()
            .unwrap_or(0)
    }

    fn record_write(&self, image: &ImageReference, digest: &str) {
        *self.writes.write().unwrap().entry(key(image)).or_insert(0) += 1;

        let mut pinned = image.clone();
        pinned.digest = Some(digest.to_string());
        // No subscribers is fine
        let _ = self.notifications.send(RegistryPushEvent::for_image(&pinned));
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRegistry for InMemoryRegistry {
    async fn push(
        &self,
        image: &ImageReference,
        platform: Platform,
        bytes: Vec<u8>,
    ) -> Result<String, RegistryError> {
        if self.read_only.read().unwrap().contains(&image.repository) {
            return Err(RegistryError::Rejected(format!(
                "denied: push access to {} is not permitted",
                image.repository
            )));
        }

        let digest = digest_of(|h| {
            platform.hash(h);
            bytes.hash(h);
        });
        debug!("push {} ({}) -> {}", image, platform, digest);

        self.entries.write().unwrap().insert(
            key(image),
            Entry::Image(StoredImage {
                platform,
                digest: digest.clone(),
                bytes,
            }),
        );
        self.record_write(image, &digest);
        Ok(digest)
    }

    async fn exists(&self, image: &ImageReference) -> Result<bool, RegistryError> {
        Ok(self.entries.read().unwrap().contains_key(&key(image)))
    }

    async fn pull(&self, image: &ImageReference) -> Result<Vec<u8>, RegistryError> {
        match self.entries.read().unwrap().get(&key(image)) {
            Some(Entry::Image(stored)) => Ok(stored.bytes.clone()),
            Some(Entry::ManifestList { .. }) => Err(RegistryError::NotFound(format!(
                "{} is a manifest list; pull a platform image instead",
                image
            ))),
            None => Err(RegistryError::NotFound(image.to_string())),
        }
    }

    async fn publish_manifest_list(
        &self,
        target: &ImageReference,
        sources: &[(Platform, ImageReference)],
    ) -> Result<String, RegistryError> {
        let digest = {
            let mut entries = self.entries.write().unwrap();

            let mut list = BTreeMap::new();
            for (platform, source) in sources {
                match entries.get(&key(source)) {
                    Some(Entry::Image(stored)) => {
                        list.insert(*platform, stored.digest.clone());
                    }
                    _ => return Err(RegistryError::NotFound(source.to_string())),
                }
            }

            let digest = digest_of(|h| list.hash(h));
            entries.insert(
                key(target),
                Entry::ManifestList {
                    digest: digest.clone(),
                    entries: list,
                },
            );
            digest
        };

        self.record_write(target, &digest);
        Ok(digest)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<RegistryPushEvent>> {
        Some(self.notifications.subscribe())
    }
}

fn key(image: &ImageReference) -> String {
    format!("{}:{}", image.repository, image.tag)
}

fn digest_of(feed: impl FnOnce(&mut DefaultHasher)) -> String {
    let mut hasher = DefaultHasher::new();
    feed(&mut hasher);
    format!("sha256:{:016x}", hasher.finish())
}
