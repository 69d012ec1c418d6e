//! In-memory run repository, used when no database is configured

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tandem_core::domain::run::PipelineRun;
use uuid::Uuid;

use super::{RepositoryError, RunRepository};

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &PipelineRun) -> Result<(), RepositoryError> {
        self.runs.write().unwrap().insert(run.id, run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError> {
        Ok(self.runs.read().unwrap().get(&id).cloned())
    }

    async fn list(&self, pipeline: Option<&str>) -> Result<Vec<PipelineRun>, RepositoryError> {
        let mut runs: Vec<PipelineRun> = self
            .runs
            .read()
            .unwrap()
            .values()
            .filter(|run| pipeline.is_none_or(|p| run.pipeline == p))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::domain::artifact::ArtifactRef;
    use tandem_core::domain::event::TriggerEvent;
    use tandem_core::domain::pipeline::{
        ActionDefinition, ActionSpec, PipelineDefinition, ReleaseConfig, StageDefinition,
        TriggerFilter,
    };

    fn run(pipeline: &str) -> PipelineRun {
        let definition = PipelineDefinition {
            name: pipeline.to_string(),
            trigger: TriggerFilter::RegistryTag {
                pattern: "*".to_string(),
            },
            stages: vec![StageDefinition {
                name: "describe".to_string(),
                actions: vec![ActionDefinition {
                    name: "describe".to_string(),
                    inputs: vec![ArtifactRef::trigger()],
                    output: None,
                    spec: ActionSpec::Describe(ReleaseConfig {
                        container_name: "app".to_string(),
                    }),
                }],
            }],
        };
        PipelineRun::new(&definition, TriggerEvent::registry_push("registry.example/app:v1"))
    }

    #[tokio::test]
    async fn test_save_replaces_and_lists_by_pipeline() {
        let repo = InMemoryRunRepository::new();
        let mut first = run("release");
        let second = run("build");

        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();

        first.error = Some("boom".to_string());
        repo.save(&first).await.unwrap();

        let stored = repo.find_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("boom"));

        assert_eq!(repo.list(None).await.unwrap().len(), 2);
        let releases = repo.list(Some("release")).await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].id, first.id);
    }
}
