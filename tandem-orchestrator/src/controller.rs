//! Pipeline controller
//!
//! Executes one `PipelineDefinition` as a sequence of `PipelineRun`s:
//! - Stages run strictly one after another; a stage starts only after the
//!   previous one succeeded.
//! - Actions of a stage run as concurrent tasks and the controller joins on
//!   all of them before deciding the stage outcome.
//! - The first failing action fails the stage and the run. Siblings are left
//!   to finish, but their outputs are discarded.
//! - Cancellation signals every in-flight action of the active stage and
//!   waits a bounded time for them to settle. Actions still running after
//!   that are aborted.
//!
//! The run record is saved after every transition so its status and each
//! action's diagnostics are available while and after it runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::domain::artifact::{Artifact, ArtifactContent, ArtifactRef};
use tandem_core::domain::event::TriggerEvent;
use tandem_core::domain::pipeline::{PipelineDefinition, StageDefinition};
use tandem_core::domain::run::{PipelineRun, RunStatus, StepStatus};
use tandem_core::error::{ActionError, ActionFailure, DefinitionError};
use tandem_runner::context::ActionContext;
use tandem_runner::service::ExecutionService;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::repository::{RepositoryError, RunRepository};

/// How long cancelled actions get to clean up before they are aborted
const CANCEL_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// How a stage ended
enum StageOutcome {
    /// Output artifacts of every action, in completion order
    Succeeded(Vec<Artifact>),
    Failed(ActionError),
    Cancelled,
}

pub struct PipelineController {
    definition: Arc<PipelineDefinition>,
    executor: Arc<dyn ExecutionService>,
    repository: Arc<dyn RunRepository>,
}

impl PipelineController {
    /// Creates a controller; the definition is validated once here
    pub fn new(
        definition: PipelineDefinition,
        executor: Arc<dyn ExecutionService>,
        repository: Arc<dyn RunRepository>,
    ) -> Result<Self, DefinitionError> {
        definition.validate()?;
        Ok(Self {
            definition: Arc::new(definition),
            executor,
            repository,
        })
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Whether `event` passes this pipeline's trigger filter
    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        self.definition.trigger.matches(event)
    }

    /// Creates and stores a pending run for `trigger`
    pub async fn create_run(&self, trigger: TriggerEvent) -> Result<PipelineRun, RepositoryError> {
        let run = PipelineRun::new(&self.definition, trigger);
        self.repository.save(&run).await?;
        info!(
            "Run {} created for pipeline '{}' ({})",
            run.id,
            self.name(),
            run.trigger.kind()
        );
        Ok(run)
    }

    /// Creates a run and executes it to completion without cancellation
    pub async fn run(&self, trigger: TriggerEvent) -> Result<PipelineRun, RepositoryError> {
        let run = self.create_run(trigger).await?;
        let (_cancel, cancel_rx) = watch::channel(false);
        Ok(self.execute(run, cancel_rx).await)
    }

    /// Drives `run` through every stage and returns it in a terminal state
    ///
    /// Setting the watched value to `true` cancels the run.
    pub async fn execute(&self, mut run: PipelineRun, mut cancel: watch::Receiver<bool>) -> PipelineRun {
        run.status = RunStatus::Running;
        run.started_at = Some(chrono::Utc::now());

        let trigger = Artifact::new(ArtifactRef::trigger(), "trigger", trigger_content(&run.trigger));
        if let Err(conflict) = run.publish(trigger) {
            // A run is executed once; a pre-published trigger means it was reused
            return self.fail(run, conflict.to_string(), RunStatus::Failed).await;
        }
        self.persist(&run).await;

        for (index, stage) in self.definition.stages.iter().enumerate() {
            if *cancel.borrow() {
                info!("Run {} cancelled before stage '{}'", run.id, stage.name);
                run.finish(RunStatus::Cancelled, Some("cancelled".to_string()));
                self.persist(&run).await;
                return run;
            }

            run.current_stage = index;
            run.stages[index].status = StepStatus::Running;
            run.stages[index].started_at = Some(chrono::Utc::now());
            info!(
                "Run {}: stage {}/{} '{}'",
                run.id,
                index + 1,
                self.definition.stages.len(),
                stage.name
            );

            let outcome = self.run_stage(&mut run, index, stage, &mut cancel).await;
            run.stages[index].completed_at = Some(chrono::Utc::now());

            match outcome {
                StageOutcome::Succeeded(outputs) => {
                    for artifact in outputs {
                        let producer = artifact.produced_by.clone();
                        let reference = artifact.reference.clone();
                        if let Err(conflict) = run.publish(artifact) {
                            run.stages[index].status = StepStatus::Failed;
                            return self.fail(run, conflict.to_string(), RunStatus::Failed).await;
                        }
                        if let Some(action) = run.action_mut(&producer) {
                            action.output = Some(reference);
                        }
                    }
                    run.stages[index].status = StepStatus::Succeeded;
                    self.persist(&run).await;
                }
                StageOutcome::Failed(err) => {
                    run.stages[index].status = StepStatus::Failed;
                    let status = if err.is_timeout() {
                        RunStatus::TimedOut
                    } else {
                        RunStatus::Failed
                    };
                    let message = format!("stage '{}' failed: {}", stage.name, err);
                    return self.fail(run, message, status).await;
                }
                StageOutcome::Cancelled => {
                    run.stages[index].status = StepStatus::Cancelled;
                    info!("Run {} cancelled during stage '{}'", run.id, stage.name);
                    run.finish(RunStatus::Cancelled, Some("cancelled".to_string()));
                    self.persist(&run).await;
                    return run;
                }
            }
        }

        run.finish(RunStatus::Succeeded, None);
        info!("Run {} of '{}' succeeded", run.id, self.name());
        self.persist(&run).await;
        run
    }

    /// Fans the stage's actions out and joins on all of them
    async fn run_stage(
        &self,
        run: &mut PipelineRun,
        index: usize,
        stage: &StageDefinition,
        cancel: &mut watch::Receiver<bool>,
    ) -> StageOutcome {
        let mut tasks: JoinSet<(String, Result<Option<ArtifactContent>, ActionError>)> =
            JoinSet::new();
        let mut contexts = HashMap::new();

        for action in &stage.actions {
            let inputs: Vec<Artifact> = action
                .inputs
                .iter()
                .filter_map(|reference| run.artifacts.get(reference).cloned())
                .collect();

            let ctx = ActionContext::new(run.id, action.name.clone());
            contexts.insert(action.name.clone(), ctx.clone());

            if let Some(record) = run.action_mut(&action.name) {
                record.status = StepStatus::Running;
                record.started_at = Some(chrono::Utc::now());
            }

            let executor = self.executor.clone();
            let pipeline = self.definition.name.clone();
            let action = action.clone();
            tasks.spawn(async move {
                let result = executor
                    .execute_action(&pipeline, &action, inputs, ctx)
                    .await;
                (action.name, result)
            });
        }
        self.persist(run).await;

        let mut outputs = Vec::new();
        let mut first_error: Option<ActionError> = None;
        let mut cancelled = false;
        let mut watching = true;
        let mut settle_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };

                    let (name, result) = match joined {
                        Ok(finished) => finished,
                        // Aborted tasks are settled after the loop
                        Err(join_err) if join_err.is_cancelled() => continue,
                        Err(join_err) => {
                            error!("Action task panicked: {}", join_err);
                            if first_error.is_none() {
                                first_error = Some(ActionError::Infrastructure(
                                    "action task panicked".to_string(),
                                ));
                            }
                            continue;
                        }
                    };

                    let logs = contexts
                        .get(&name)
                        .map(|ctx| ctx.drain_logs())
                        .unwrap_or_default();
                    let output_ref = self
                        .definition
                        .action(&name)
                        .and_then(|a| a.output.clone());

                    let Some(record) = run.action_mut(&name) else {
                        continue;
                    };
                    record.logs.extend(logs);
                    record.completed_at = Some(chrono::Utc::now());

                    match result {
                        Ok(content) => {
                            record.status = StepStatus::Succeeded;
                            debug!("Action '{}' succeeded", name);
                            if first_error.is_none() && !cancelled {
                                if let (Some(reference), Some(content)) = (output_ref, content) {
                                    outputs.push(Artifact::new(reference, name.clone(), content));
                                }
                            }
                        }
                        Err(ActionError::Cancelled) => {
                            record.status = StepStatus::Cancelled;
                        }
                        Err(err) => {
                            warn!("Action '{}' failed: {}", name, err);
                            record.status = StepStatus::Failed;
                            record.failure = Some(ActionFailure::from(&err));
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                        }
                    }
                    self.persist(run).await;
                }

                changed = cancel.changed(), if watching && !cancelled => {
                    if changed.is_err() {
                        // Sender dropped: nobody can cancel this run any more
                        watching = false;
                    } else if *cancel.borrow() {
                        info!(
                            "Cancelling {} in-flight action(s) of stage '{}'",
                            tasks.len(),
                            stage.name
                        );
                        cancelled = true;
                        for ctx in contexts.values() {
                            ctx.cancel();
                        }
                        settle_deadline = Some(Instant::now() + CANCEL_SETTLE_TIMEOUT);
                    }
                }

                _ = tokio::time::sleep_until(settle_deadline.unwrap_or_else(Instant::now)),
                    if settle_deadline.is_some() =>
                {
                    warn!(
                        "Aborting {} action(s) of stage '{}' that did not settle",
                        tasks.len(),
                        stage.name
                    );
                    settle_deadline = None;
                    tasks.abort_all();
                }
            }
        }

        // Actions that never reported back were aborted or panicked
        let now = chrono::Utc::now();
        for record in run.stages[index].actions.iter_mut() {
            if record.status != StepStatus::Running {
                continue;
            }
            if let Some(ctx) = contexts.get(&record.name) {
                record.logs.extend(ctx.drain_logs());
            }
            record.completed_at = Some(now);
            if cancelled {
                record.status = StepStatus::Cancelled;
            } else {
                record.status = StepStatus::Failed;
                record.failure = first_error.as_ref().map(ActionFailure::from);
            }
        }

        if cancelled {
            StageOutcome::Cancelled
        } else if let Some(err) = first_error {
            StageOutcome::Failed(err)
        } else {
            StageOutcome::Succeeded(outputs)
        }
    }

    async fn fail(&self, mut run: PipelineRun, message: String, status: RunStatus) -> PipelineRun {
        error!("Run {} of '{}' {}: {}", run.id, self.name(), status, message);
        run.finish(status, Some(message));
        self.persist(&run).await;
        run
    }

    async fn persist(&self, run: &PipelineRun) {
        if let Err(e) = self.repository.save(run).await {
            warn!("Failed to save run {}: {}", run.id, e);
        }
    }
}

/// Artifact content carrying the trigger event into the first stage
fn trigger_content(trigger: &TriggerEvent) -> ArtifactContent {
    match trigger {
        TriggerEvent::SourcePush(push) => ArtifactContent::Source(push.clone()),
        TriggerEvent::RegistryPush(push) => ArtifactContent::RegistryEvent(push.clone()),
    }
}
