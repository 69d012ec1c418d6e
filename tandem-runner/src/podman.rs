//! Podman command execution
//!
//! Thin async wrapper around the podman CLI used by the registry and service
//! backends. Child processes are killed when the awaiting future is dropped,
//! so aborting an action also stops the podman process it started.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Captured output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr trimmed and joined, for diagnostics
    pub fn combined(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Handle on the podman binary
#[derive(Debug, Clone)]
pub struct Podman {
    binary: String,
}

impl Podman {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks that podman is installed and answers
    pub async fn check_available(&self) -> Result<String> {
        let output = self
            .run(["--version"])
            .await
            .context("Failed to execute 'podman --version'. Is podman installed?")?;

        if !output.success() {
            anyhow::bail!("Podman is not working correctly: {}", output.combined());
        }

        let version = output.stdout.trim().to_string();
        info!("Podman is available: {}", version);
        Ok(version)
    }

    /// Runs podman with the given arguments and captures its output
    ///
    /// A non-zero exit status is not an error here; callers decide what it means.
    pub async fn run<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {:?}", command.as_std());

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if !result.success() {
            debug!(
                "podman exited with {}: stderr='{}'",
                result.exit_code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}

impl Default for Podman {
    fn default() -> Self {
        Self::new("podman")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            stdout: "built\n".to_string(),
            stderr: "  \n".to_string(),
            exit_code: 0,
        };
        assert_eq!(output.combined(), "built");
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let podman = Podman::new("/nonexistent/podman-binary");
        assert!(podman.check_available().await.is_err());
    }
}
