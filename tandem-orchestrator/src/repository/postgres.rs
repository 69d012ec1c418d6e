//! Postgres run repository
//!
//! Each run is stored as one JSONB document next to a few columns used for
//! filtering and ordering.

use async_trait::async_trait;
use sqlx::PgPool;
use tandem_core::domain::run::{PipelineRun, RunStatus};
use uuid::Uuid;

use super::{RepositoryError, RunRepository};

pub struct PostgresRunRepository {
    pool: PgPool,
}

impl PostgresRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn save(&self, run: &PipelineRun) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(run)?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, pipeline, status, requested_at, completed_at, document)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                completed_at = EXCLUDED.completed_at,
                document = EXCLUDED.document
            "#,
        )
        .bind(run.id)
        .bind(&run.pipeline)
        .bind(status_to_string(run.status))
        .bind(run.requested_at)
        .bind(run.completed_at)
        .bind(document)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT document
            FROM pipeline_runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineRun::try_from).transpose()
    }

    async fn list(&self, pipeline: Option<&str>) -> Result<Vec<PipelineRun>, RepositoryError> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT document
            FROM pipeline_runs
            WHERE $1::VARCHAR IS NULL OR pipeline = $1
            ORDER BY requested_at DESC
            "#,
        )
        .bind(pipeline)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "Pending",
        RunStatus::Running => "Running",
        RunStatus::Succeeded => "Succeeded",
        RunStatus::Failed => "Failed",
        RunStatus::Cancelled => "Cancelled",
        RunStatus::TimedOut => "TimedOut",
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    document: serde_json::Value,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = RepositoryError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(serde_json::from_value(row.document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_column_matches_display() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::TimedOut,
        ] {
            assert_eq!(status_to_string(status), status.to_string());
        }
    }
}
