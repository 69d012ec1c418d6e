//! Trigger dispatcher
//!
//! Routes incoming events to every pipeline whose trigger filter accepts
//! them and keeps a cancel handle for each run in flight. Events that no
//! filter accepts are ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tandem_core::domain::event::{RegistryPushEvent, TriggerEvent};
use tandem_core::domain::run::PipelineRun;
use tandem_core::dto::trigger::StartedRun;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::PipelineController;
use crate::repository::{RepositoryError, RunRepository};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A run started by the dispatcher
pub struct RunHandle {
    pub run_id: Uuid,
    pub pipeline: String,
    pub task: JoinHandle<PipelineRun>,
}

impl From<&RunHandle> for StartedRun {
    fn from(handle: &RunHandle) -> Self {
        Self {
            run_id: handle.run_id,
            pipeline: handle.pipeline.clone(),
        }
    }
}

pub struct Dispatcher {
    controllers: Vec<Arc<PipelineController>>,
    repository: Arc<dyn RunRepository>,
    active: Arc<Mutex<HashMap<Uuid, watch::Sender<bool>>>>,
}

impl Dispatcher {
    pub fn new(controllers: Vec<PipelineController>, repository: Arc<dyn RunRepository>) -> Self {
        Self {
            controllers: controllers.into_iter().map(Arc::new).collect(),
            repository,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn repository(&self) -> Arc<dyn RunRepository> {
        self.repository.clone()
    }

    /// Starts one run per pipeline that accepts `event`
    pub async fn dispatch(&self, event: TriggerEvent) -> Result<Vec<RunHandle>, DispatchError> {
        let mut started = Vec::new();

        for controller in &self.controllers {
            if !controller.accepts(&event) {
                debug!("Pipeline '{}' ignores {}", controller.name(), event.kind());
                continue;
            }

            let run = controller.create_run(event.clone()).await?;
            let run_id = run.id;
            let (cancel, cancel_rx) = watch::channel(false);
            self.active.lock().unwrap().insert(run_id, cancel);

            let pipeline = controller.name().to_string();
            info!("Started run {} of pipeline '{}'", run_id, pipeline);

            let controller = controller.clone();
            let active = self.active.clone();
            let task = tokio::spawn(async move {
                let run = controller.execute(run, cancel_rx).await;
                active.lock().unwrap().remove(&run.id);
                run
            });

            started.push(RunHandle {
                run_id,
                pipeline,
                task,
            });
        }

        if started.is_empty() {
            info!("No pipeline accepted {} event", event.kind());
        }
        Ok(started)
    }

    /// Requests cancellation of a run
    ///
    /// Returns `false` when the run had already reached a terminal status.
    pub async fn cancel(&self, run_id: Uuid) -> Result<bool, DispatchError> {
        let sender = self.active.lock().unwrap().get(&run_id).cloned();
        if let Some(cancel) = sender {
            info!("Cancelling run {}", run_id);
            // The run may finish between lookup and send; that is not an error
            return Ok(cancel.send(true).is_ok());
        }

        match self.repository.find_by_id(run_id).await? {
            Some(_) => Ok(false),
            None => Err(DispatchError::RunNotFound(run_id)),
        }
    }

    /// Number of runs currently executing
    pub fn active_runs(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Starts runs for every notification published on `notifications`
    pub fn bind_registry(
        self: &Arc<Self>,
        mut notifications: broadcast::Receiver<RegistryPushEvent>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(event) => {
                        debug!("Registry notification: {:?}", event.image_uri);
                        if let Err(e) = dispatcher.dispatch(TriggerEvent::RegistryPush(event)).await {
                            warn!("Failed to dispatch registry notification: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} registry notification(s)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Registry notification stream closed");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tandem_core::domain::image::{ImageReference, Platform};
    use tandem_core::domain::run::RunStatus;

    use crate::pipelines::{BUILD_PIPELINE, RELEASE_PIPELINE};
    use crate::testing::dispatcher;

    #[tokio::test]
    async fn test_events_route_to_matching_pipelines() {
        let (dispatcher, _) = dispatcher(Duration::ZERO);

        let runs = dispatcher
            .dispatch(TriggerEvent::source_push("prod", "abc123"))
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pipeline, BUILD_PIPELINE);

        let runs = dispatcher
            .dispatch(TriggerEvent::registry_push("registry.example/app:latest"))
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pipeline, RELEASE_PIPELINE);

        let none = dispatcher
            .dispatch(TriggerEvent::source_push("feature/x", "abc123"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_dispatched_run_completes() {
        let (dispatcher, repository) = dispatcher(Duration::ZERO);

        let mut runs = dispatcher
            .dispatch(TriggerEvent::source_push("prod", "abc123"))
            .await
            .unwrap();
        let handle = runs.remove(0);
        let run = handle.task.await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(dispatcher.active_runs(), 0);
        let stored = repository.find_by_id(handle.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_run() {
        let (dispatcher, _) = dispatcher(Duration::from_secs(60));

        let mut runs = dispatcher
            .dispatch(TriggerEvent::source_push("prod", "abc123"))
            .await
            .unwrap();
        let handle = runs.remove(0);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(dispatcher.cancel(handle.run_id).await.unwrap());
        let run = handle.task.await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);

        // Terminal runs cannot be cancelled again
        assert!(!dispatcher.cancel(handle.run_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let (dispatcher, _) = dispatcher(Duration::ZERO);
        let err = dispatcher.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DispatchError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_registry_binding_starts_release() {
        let (dispatcher, repository) = dispatcher(Duration::ZERO);
        let (tx, rx) = broadcast::channel(8);
        let binding = dispatcher.bind_registry(rx);

        let arch = ImageReference::for_platform("registry.example/app", "latest", Platform::Arm64);
        tx.send(RegistryPushEvent::for_image(&arch)).unwrap();
        let base = ImageReference::new("registry.example/app", "latest");
        tx.send(RegistryPushEvent::for_image(&base)).unwrap();
        drop(tx);
        binding.await.unwrap();

        let runs = repository.list(None).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pipeline, RELEASE_PIPELINE);
    }
}
