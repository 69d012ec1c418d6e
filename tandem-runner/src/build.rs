//! Per-architecture image build
//!
//! An `ArchitectureBuildJob` runs one containerized build for one target
//! platform through a `BuildRunner`. The runner is handed the build
//! environment as process environment variables and its exit code is the
//! only success signal. Builds are never retried here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tandem_core::domain::image::ImageReference;
use tandem_core::domain::log::LogLevel;
use tandem_core::domain::pipeline::BuildEnvironment;
use tandem_core::error::{ActionError, BuildFailureReason};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::context::ActionContext;

/// Build-and-push script used when no override is configured
pub const DEFAULT_BUILD_SCRIPT: &str = r#"set -eu
podman build --platform "$PLATFORM" -t "$REPOSITORY_URI:$IMAGE_TAG" -f "$PATH_TO_DOCKERFILE" .
podman push "$REPOSITORY_URI:$IMAGE_TAG""#;

/// Lines of output kept as failure diagnostics
const DIAGNOSTIC_LINES: usize = 20;

/// Output of a finished build runner invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Executes a build in a workspace with the given environment
///
/// An `Err` means the runner could not be started at all; a build that ran
/// and failed is reported through a non-zero `exit_code`.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run(
        &self,
        workspace: &Path,
        env: &BTreeMap<String, String>,
        ctx: &ActionContext,
    ) -> Result<RunnerOutput>;
}

/// Build runner that executes a shell script
pub struct CommandBuildRunner {
    shell: String,
    script: String,
}

impl CommandBuildRunner {
    pub fn new(script: Option<String>) -> Self {
        Self {
            shell: "sh".to_string(),
            script: script.unwrap_or_else(|| DEFAULT_BUILD_SCRIPT.to_string()),
        }
    }
}

impl Default for CommandBuildRunner {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl BuildRunner for CommandBuildRunner {
    async fn run(
        &self,
        workspace: &Path,
        env: &BTreeMap<String, String>,
        ctx: &ActionContext,
    ) -> Result<RunnerOutput> {
        debug!("[{}] running build script in {}", ctx.action, workspace.display());

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.script)
            .current_dir(workspace)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start build shell '{}'", self.shell))?;

        Ok(RunnerOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Builds, tags and pushes the image for one platform
pub struct ArchitectureBuildJob {
    runner: Arc<dyn BuildRunner>,
    workspace: PathBuf,
}

impl ArchitectureBuildJob {
    pub fn new(runner: Arc<dyn BuildRunner>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workspace: workspace.into(),
        }
    }

    /// Runs the build described by `env` and returns the pushed image
    ///
    /// `extra_env` is merged under the contract variables, which always win.
    pub async fn execute(
        &self,
        pipeline: &str,
        env: &BuildEnvironment,
        extra_env: BTreeMap<String, String>,
        ctx: &ActionContext,
    ) -> Result<ImageReference, ActionError> {
        let image = env.image();
        let dockerfile = self.workspace.join(&env.dockerfile_path);

        let is_file = tokio::fs::metadata(&dockerfile)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            ctx.log_error(format!("Dockerfile not found: {}", dockerfile.display()));
            return Err(ActionError::BuildFailed {
                reason: BuildFailureReason::DockerfileNotFound,
                diagnostics: format!(
                    "'{}' does not resolve to a file in {}",
                    env.dockerfile_path,
                    self.workspace.display()
                ),
            });
        }

        let mut vars = extra_env;
        vars.extend(env.env_vars());

        ctx.log_info(format!("Building image for {} tag: {}", pipeline, env.image_tag()));
        ctx.log_debug(format!("Platform {} -> {}", env.platform.as_str(), image));
        info!("[{}] building {} for {}", ctx.action, image, env.platform);

        // Dropping the runner future kills the build process
        let run = tokio::select! {
            run = self.runner.run(&self.workspace, &vars, ctx) => run,
            _ = ctx.cancelled() => {
                ctx.log_warning("Build cancelled");
                return Err(ActionError::Cancelled);
            }
        };

        let output = match run {
            Ok(output) => output,
            Err(e) => {
                warn!("[{}] build runner unavailable: {:#}", ctx.action, e);
                ctx.log_error(format!("Build runner unavailable: {:#}", e));
                return Err(ActionError::BuildFailed {
                    reason: BuildFailureReason::RunnerUnavailable,
                    diagnostics: format!("{:#}", e),
                });
            }
        };

        ctx.log_output(&output.stdout, LogLevel::Info);
        ctx.log_output(&output.stderr, LogLevel::Warning);

        if output.exit_code != 0 {
            let reason = classify_failure(&output);
            ctx.log_error(format!(
                "Build exited with code {} ({})",
                output.exit_code, reason
            ));
            return Err(ActionError::BuildFailed {
                reason,
                diagnostics: diagnostics(&output),
            });
        }

        ctx.log_info(format!("Pushed {}", image));
        info!("[{}] pushed {}", ctx.action, image);
        Ok(image)
    }
}

fn classify_failure(output: &RunnerOutput) -> BuildFailureReason {
    let text = format!("{}\n{}", output.stdout, output.stderr).to_lowercase();
    let rejected = [
        "unauthorized",
        "denied",
        "authentication required",
        "403 forbidden",
    ];
    if rejected.iter().any(|m| text.contains(m)) {
        BuildFailureReason::PushRejected
    } else {
        BuildFailureReason::BuildExited
    }
}

/// Last lines of stderr, or of stdout when stderr is empty
fn diagnostics(output: &RunnerOutput) -> String {
    let source = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = &lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..];
    if tail.is_empty() {
        format!("exit code {}", output.exit_code)
    } else {
        tail.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ContainerRegistry, InMemoryRegistry};
    use std::sync::Mutex;
    use tandem_core::domain::image::Platform;
    use uuid::Uuid;

    struct FakeRunner {
        registry: Arc<InMemoryRegistry>,
        exit_code: i32,
        stderr: String,
        seen_env: Mutex<Option<BTreeMap<String, String>>>,
    }

    impl FakeRunner {
        fn new(registry: Arc<InMemoryRegistry>, exit_code: i32, stderr: &str) -> Arc<Self> {
            Arc::new(Self {
                registry,
                exit_code,
                stderr: stderr.to_string(),
                seen_env: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl BuildRunner for FakeRunner {
        async fn run(
            &self,
            _workspace: &Path,
            env: &BTreeMap<String, String>,
            _ctx: &ActionContext,
        ) -> Result<RunnerOutput> {
            *self.seen_env.lock().unwrap() = Some(env.clone());
            if self.exit_code == 0 {
                let platform = Platform::parse(&env["PLATFORM"]).unwrap();
                let image = ImageReference::new(env["REPOSITORY_URI"].clone(), env["IMAGE_TAG"].clone());
                self.registry
                    .push(&image, platform, b"image".to_vec())
                    .await
                    .map_err(anyhow::Error::from)?;
            }
            Ok(RunnerOutput {
                exit_code: self.exit_code,
                stdout: "STEP 1/1: FROM scratch\n".to_string(),
                stderr: self.stderr.clone(),
            })
        }
    }

    fn workspace_with_dockerfile() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tandem-build-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Dockerfile"), "FROM scratch\n").unwrap();
        dir
    }

    fn environment(platform: Platform, dockerfile: &str) -> BuildEnvironment {
        BuildEnvironment {
            registry_uri: "registry.example/app".to_string(),
            base_tag: "v1".to_string(),
            platform,
            dockerfile_path: dockerfile.to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_build_pushes_arch_tag() {
        let registry = Arc::new(InMemoryRegistry::new());
        let runner = FakeRunner::new(registry.clone(), 0, "");
        let job = ArchitectureBuildJob::new(runner.clone(), workspace_with_dockerfile());
        let ctx = ActionContext::new(Uuid::new_v4(), "build-arm64");

        let image = job
            .execute(
                "build",
                &environment(Platform::Arm64, "Dockerfile"),
                BTreeMap::from([("COMMIT_REF".to_string(), "abc123".to_string())]),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(image.to_string(), "registry.example/app:v1-arm64");
        assert!(registry.exists(&image).await.unwrap());

        let env = runner.seen_env.lock().unwrap().clone().unwrap();
        assert_eq!(env["PLATFORM"], "linux/arm64");
        assert_eq!(env["IMAGE_TAG"], "v1-arm64");
        assert_eq!(env["PATH_TO_DOCKERFILE"], "Dockerfile");
        assert_eq!(env["COMMIT_REF"], "abc123");

        let logs = ctx.drain_logs();
        assert!(logs.iter().any(|l| l.message == "Building image for build tag: v1-arm64"));
    }

    #[tokio::test]
    async fn test_missing_dockerfile() {
        let registry = Arc::new(InMemoryRegistry::new());
        let runner = FakeRunner::new(registry.clone(), 0, "");
        let job = ArchitectureBuildJob::new(runner.clone(), workspace_with_dockerfile());
        let ctx = ActionContext::new(Uuid::new_v4(), "build-amd64");

        let err = job
            .execute("build", &environment(Platform::Amd64, "docker/Missing"), BTreeMap::new(), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ActionError::BuildFailed {
                reason: BuildFailureReason::DockerfileNotFound,
                ..
            }
        ));
        // The runner never started
        assert!(runner.seen_env.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_rejection_is_classified() {
        let registry = Arc::new(InMemoryRegistry::new());
        let runner = FakeRunner::new(
            registry.clone(),
            125,
            "Error: denied: requested access to the resource is denied\n",
        );
        let job = ArchitectureBuildJob::new(runner, workspace_with_dockerfile());
        let ctx = ActionContext::new(Uuid::new_v4(), "build-amd64");

        let err = job
            .execute("build", &environment(Platform::Amd64, "Dockerfile"), BTreeMap::new(), &ctx)
            .await
            .unwrap_err();

        match err {
            ActionError::BuildFailed { reason, diagnostics } => {
                assert_eq!(reason, BuildFailureReason::PushRejected);
                assert!(diagnostics.contains("requested access"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!registry
            .exists(&ImageReference::new("registry.example/app", "v1-amd64"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_command_runner_reports_exit_code() {
        let runner = CommandBuildRunner::new(Some(
            "echo \"building $IMAGE_TAG\"; echo broken >&2; exit 3".to_string(),
        ));
        let job = ArchitectureBuildJob::new(Arc::new(runner), workspace_with_dockerfile());
        let ctx = ActionContext::new(Uuid::new_v4(), "build-amd64");

        let err = job
            .execute("build", &environment(Platform::Amd64, "Dockerfile"), BTreeMap::new(), &ctx)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ActionError::BuildFailed {
                reason: BuildFailureReason::BuildExited,
                diagnostics: "broken".to_string(),
            }
        );
        let logs = ctx.drain_logs();
        assert!(logs.iter().any(|l| l.message == "building v1-amd64"));
    }

    #[tokio::test]
    async fn test_cancel_stops_running_build() {
        let runner = CommandBuildRunner::new(Some("sleep 30".to_string()));
        let job = ArchitectureBuildJob::new(Arc::new(runner), workspace_with_dockerfile());
        let ctx = ActionContext::new(Uuid::new_v4(), "build-amd64");

        let canceller = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                ctx.cancel();
            }
        });

        let started = std::time::Instant::now();
        let err = job
            .execute("build", &environment(Platform::Amd64, "Dockerfile"), BTreeMap::new(), &ctx)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, ActionError::Cancelled);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unstartable_runner() {
        let mut runner = CommandBuildRunner::default();
        runner.shell = "/nonexistent/shell".to_string();
        let job = ArchitectureBuildJob::new(Arc::new(runner), workspace_with_dockerfile());
        let ctx = ActionContext::new(Uuid::new_v4(), "build-amd64");

        let err = job
            .execute("build", &environment(Platform::Amd64, "Dockerfile"), BTreeMap::new(), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ActionError::BuildFailed {
                reason: BuildFailureReason::RunnerUnavailable,
                ..
            }
        ));
    }
}
