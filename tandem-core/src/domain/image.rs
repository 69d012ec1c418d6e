//! Image reference types
//!
//! Per-architecture images are tagged `<base-tag>-<arch>`; the merged
//! multi-architecture manifest list carries the bare `<base-tag>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Target CPU platform of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Amd64,
    Arm64,
}

impl Platform {
    /// Every platform the pipeline builds for
    pub const ALL: [Platform; 2] = [Platform::Amd64, Platform::Arm64];

    /// Architecture suffix used in per-architecture tags
    pub fn arch(&self) -> &'static str {
        match self {
            Platform::Amd64 => "amd64",
            Platform::Arm64 => "arm64",
        }
    }

    /// OCI platform string passed to the builder (e.g. `linux/arm64`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Amd64 => "linux/amd64",
            Platform::Arm64 => "linux/arm64",
        }
    }

    /// Parses either the bare architecture or the OCI platform string
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "linux/amd64" => Some(Platform::Amd64),
            "arm64" | "aarch64" | "linux/arm64" | "linux/arm64/v8" => Some(Platform::Arm64),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry repository plus a tag, optionally pinned by digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Fully qualified repository URI (e.g. `registry.example/app`)
    pub repository: String,
    /// Tag; empty only when the reference is pinned by digest alone
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into().trim_end_matches('/').to_string(),
            tag: tag.into(),
            digest: None,
        }
    }

    /// Reference of the per-architecture image for `base_tag`
    pub fn for_platform(repository: impl Into<String>, base_tag: &str, platform: Platform) -> Self {
        Self::new(repository, arch_tag(base_tag, platform))
    }

    /// Same repository, different tag
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self::new(self.repository.clone(), tag)
    }

    /// Parses `repo:tag`, `repo@sha256:...` or `repo:tag@sha256:...`
    ///
    /// References with neither tag nor digest are rejected rather than
    /// defaulted to `latest`.
    pub fn parse(uri: &str) -> Option<Self> {
        let uri = uri.trim();
        if uri.is_empty() || uri.chars().any(char::is_whitespace) || uri.contains("://") {
            return None;
        }

        let (name, digest) = match uri.split_once('@') {
            Some((name, digest)) => {
                let (algorithm, hex) = digest.split_once(':')?;
                if algorithm.is_empty() || hex.is_empty() {
                    return None;
                }
                (name, Some(digest.to_string()))
            }
            None => (uri, None),
        };

        // A ':' before the last '/' belongs to a registry host port
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match name[last_slash..].rfind(':') {
            Some(offset) => {
                let split = last_slash + offset;
                (&name[..split], &name[split + 1..])
            }
            None => (name, ""),
        };

        if repository.is_empty() || repository.ends_with('/') {
            return None;
        }
        if tag.is_empty() && digest.is_none() {
            return None;
        }
        if !tag.is_empty() && !is_valid_tag(tag) {
            return None;
        }

        Some(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Per-architecture tag convention: `<base-tag>-<arch>`
pub fn arch_tag(base_tag: &str, platform: Platform) -> String {
    format!("{}-{}", base_tag, platform.arch())
}

/// Tags are 1-128 chars of `[A-Za-z0-9_.-]`, not starting with `.` or `-`
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() || first == '_' => {}
        _ => return false,
    }
    tag.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_tags_follow_convention() {
        assert_eq!(arch_tag("v1", Platform::Amd64), "v1-amd64");
        assert_eq!(arch_tag("v1", Platform::Arm64), "v1-arm64");

        let image = ImageReference::for_platform("registry.example/app", "v1", Platform::Arm64);
        assert_eq!(image.to_string(), "registry.example/app:v1-arm64");
    }

    #[test]
    fn test_parse_tagged_reference() {
        let image = ImageReference::parse("registry.example/app:v3").unwrap();
        assert_eq!(image.repository, "registry.example/app");
        assert_eq!(image.tag, "v3");
        assert_eq!(image.digest, None);
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = ImageReference::parse("localhost:5000/team/app:latest").unwrap();
        assert_eq!(image.repository, "localhost:5000/team/app");
        assert_eq!(image.tag, "latest");
    }

    #[test]
    fn test_parse_digest_reference() {
        let image = ImageReference::parse("registry.example/app@sha256:abc123").unwrap();
        assert_eq!(image.tag, "");
        assert_eq!(image.digest.as_deref(), Some("sha256:abc123"));
        assert_eq!(image.to_string(), "registry.example/app@sha256:abc123");

        let pinned = ImageReference::parse("registry.example/app:v3@sha256:abc123").unwrap();
        assert_eq!(pinned.tag, "v3");
        assert_eq!(pinned.to_string(), "registry.example/app:v3@sha256:abc123");
    }

    #[test]
    fn test_parse_rejects_unresolvable_references() {
        assert!(ImageReference::parse("").is_none());
        assert!(ImageReference::parse("registry.example/app").is_none());
        assert!(ImageReference::parse("registry.example/app:").is_none());
        assert!(ImageReference::parse("https://registry.example/app:v1").is_none());
        assert!(ImageReference::parse("registry.example/app:bad tag").is_none());
        assert!(ImageReference::parse("registry.example/app@sha256").is_none());
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!(Platform::parse("linux/amd64"), Some(Platform::Amd64));
        assert_eq!(Platform::parse("aarch64"), Some(Platform::Arm64));
        assert_eq!(Platform::parse("riscv64"), None);
    }
}
