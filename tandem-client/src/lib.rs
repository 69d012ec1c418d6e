//! Tandem HTTP Client
//!
//! A type-safe HTTP client for the Tandem orchestrator API, used by the CLI.
//!
//! # Example
//!
//! ```no_run
//! use tandem_client::OrchestratorClient;
//!
//! # async fn example() -> tandem_client::Result<()> {
//! let client = OrchestratorClient::new("http://localhost:8080");
//! let started = client.trigger_source("prod", "4f2a9c1").await?;
//!
//! for run in started.runs {
//!     println!("{} started run {}", run.pipeline, run.run_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
mod runs;
mod triggers;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;
use tandem_core::dto::health::HealthResponse;

/// HTTP client for the Tandem orchestrator API
///
/// Endpoints are grouped by concern:
/// - Triggers (source push, registry notification)
/// - Runs (list, inspect, logs, cancel)
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    client: Client,
}

impl OrchestratorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check orchestrator liveness
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.url("/health")).send().await?;
        self.handle_response(response).await
    }

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.url("/runs"), "http://localhost:8080/runs");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = OrchestratorClient::with_client("http://localhost:8080", http_client);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
