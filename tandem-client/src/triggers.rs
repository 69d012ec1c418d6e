//! Trigger endpoints

use tandem_core::domain::event::{RegistryPushEvent, SourcePushEvent};
use tandem_core::dto::trigger::TriggerResponse;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Report a push to the source repository
    ///
    /// The response lists the runs started; it is empty when no pipeline
    /// listens on `branch`.
    pub async fn trigger_source(
        &self,
        branch: impl Into<String>,
        commit_ref: impl Into<String>,
    ) -> Result<TriggerResponse> {
        let event = SourcePushEvent {
            branch: branch.into(),
            commit_ref: commit_ref.into(),
        };
        let response = self
            .client
            .post(self.url("/trigger/source"))
            .json(&event)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Forward a registry push notification
    pub async fn trigger_registry(&self, event: &RegistryPushEvent) -> Result<TriggerResponse> {
        let response = self
            .client
            .post(self.url("/trigger/registry"))
            .json(event)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
