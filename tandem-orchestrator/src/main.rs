use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tandem_orchestrator::api::{self, AppState};
use tandem_orchestrator::config::OrchestratorConfig;
use tandem_orchestrator::controller::PipelineController;
use tandem_orchestrator::db;
use tandem_orchestrator::dispatcher::Dispatcher;
use tandem_orchestrator::pipelines::{build_pipeline, release_pipeline};
use tandem_orchestrator::repository::{
    InMemoryRunRepository, PostgresRunRepository, RunRepository,
};
use tandem_runner::build::{ArchitectureBuildJob, CommandBuildRunner};
use tandem_runner::deploy::PodmanServiceBackend;
use tandem_runner::podman::Podman;
use tandem_runner::registry::{ContainerRegistry, PodmanRegistry};
use tandem_runner::service::StandardExecutionService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tandem Orchestrator...");

    let config = OrchestratorConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Repository: {}:{} (branch: {}, release tags: {})",
        config.registry_uri,
        config.image_tag,
        config.branch,
        config.release_tag_pattern
    );

    let repository: Arc<dyn RunRepository> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database connection pool created");
            Arc::new(PostgresRunRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, run history is kept in memory");
            Arc::new(InMemoryRunRepository::new())
        }
    };

    let podman = Podman::new(config.runner.podman_binary.clone());
    match podman.check_available().await {
        Ok(version) => tracing::info!("Using {}", version),
        Err(e) => tracing::warn!("podman is not available: {:#}", e),
    }

    let registry: Arc<dyn ContainerRegistry> = Arc::new(PodmanRegistry::new(podman.clone()));
    let service_backend = Arc::new(
        PodmanServiceBackend::new(podman, config.service_port).with_host_port(config.service_host_port),
    );
    let build_job = ArchitectureBuildJob::new(
        Arc::new(CommandBuildRunner::new(config.runner.build_command.clone())),
        config.runner.workspace_dir.clone(),
    );
    let executor = Arc::new(StandardExecutionService::new(
        build_job,
        registry.clone(),
        service_backend,
    ));

    let controllers = vec![
        PipelineController::new(build_pipeline(&config), executor.clone(), repository.clone())
            .context("Invalid build pipeline")?,
        PipelineController::new(release_pipeline(&config), executor, repository.clone())
            .context("Invalid release pipeline")?,
    ];
    let dispatcher = Arc::new(Dispatcher::new(controllers, repository));

    if let Some(notifications) = registry.subscribe() {
        tracing::info!("Listening for registry push notifications");
        dispatcher.bind_registry(notifications);
    }

    // Build router with all API endpoints
    let app = api::create_router(AppState::new(dispatcher));

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
