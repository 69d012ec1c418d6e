//! ID resolver module
//!
//! Resolves run id prefixes to full UUIDs by querying the run listing.

use anyhow::{Context, Result, anyhow};
use tandem_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a run ID or prefix to a full UUID
///
/// Full UUIDs are returned without contacting the orchestrator.
pub async fn resolve_run_id(client: &OrchestratorClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    let prefix = match id_or_prefix {
        IdOrPrefix::Full(uuid) => return Ok(*uuid),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    let runs = client
        .list_runs(None)
        .await
        .context("Failed to fetch runs for ID resolution")?;

    match_prefix(runs.iter().map(|r| r.id), prefix)
}

fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No run found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
