//! Runner configuration
//!
//! Settings for the build runner and the podman-backed collaborators.

use std::path::PathBuf;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory holding the build context (checked-out source)
    pub workspace_dir: PathBuf,

    /// Shell script run for each architecture build; the default podman
    /// build-and-push script when unset
    pub build_command: Option<String>,

    /// podman binary used by the registry and service backends
    pub podman_binary: String,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            build_command: None,
            podman_binary: "podman".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WORKSPACE_DIR (optional, default: /tmp/tandem)
    /// - BUILD_COMMAND (optional)
    /// - PODMAN_BIN (optional, default: podman)
    pub fn from_env() -> anyhow::Result<Self> {
        let workspace_dir = std::env::var("WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp/tandem"));

        let build_command = std::env::var("BUILD_COMMAND")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let podman_binary = std::env::var("PODMAN_BIN").unwrap_or_else(|_| "podman".to_string());

        Ok(Self {
            workspace_dir,
            build_command,
            podman_binary,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workspace_dir.as_os_str().is_empty() {
            anyhow::bail!("workspace_dir cannot be empty");
        }

        if !self.workspace_dir.is_absolute() {
            anyhow::bail!("workspace_dir must be an absolute path");
        }

        if self.podman_binary.trim().is_empty() {
            anyhow::bail!("podman_binary cannot be empty");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new("/tmp/tandem")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.workspace_dir, PathBuf::from("/tmp/tandem"));
        assert_eq!(config.podman_binary, "podman");
        assert!(config.build_command.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunnerConfig::default();

        config.workspace_dir = PathBuf::from("relative/dir");
        assert!(config.validate().is_err());

        config.workspace_dir = PathBuf::from("/srv/build");
        config.podman_binary = String::new();
        assert!(config.validate().is_err());

        config.podman_binary = "/usr/bin/podman".to_string();
        assert!(config.validate().is_ok());
    }
}
