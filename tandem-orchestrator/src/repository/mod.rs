//! Repository Module
//!
//! Run audit storage. Runs are saved after every state transition and are
//! never deleted or reused.

mod memory;
mod postgres;

pub use memory::InMemoryRunRepository;
pub use postgres::PostgresRunRepository;

use async_trait::async_trait;
use tandem_core::domain::run::PipelineRun;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored run could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Inserts or replaces the stored copy of `run`
    async fn save(&self, run: &PipelineRun) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError>;

    /// Runs, newest first, optionally restricted to one pipeline
    async fn list(&self, pipeline: Option<&str>) -> Result<Vec<PipelineRun>, RepositoryError>;
}
