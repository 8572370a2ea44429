//! Keel HTTP Client
//!
//! A simple, type-safe HTTP client for the Keel controller and agent APIs.
//!
//! Two clients are provided:
//! - [`ControllerClient`]: used by agents (registration, heartbeats, event
//!   relay) and by the CLI (node queries, pipeline dispatch, streams)
//! - [`AgentClient`]: used by the controller to forward requests to the
//!   agent running on a node
//!
//! # Example
//!
//! ```no_run
//! use keel_client::ControllerClient;
//!
//! #[tokio::main]
//! async fn main() -> keel_client::Result<()> {
//!     let client = ControllerClient::new("http://localhost:8080");
//!
//!     for node in client.list_nodes().await? {
//!         println!("{} last seen {}", node.node_id, node.last_seen_at);
//!     }
//!     Ok(())
//! }
//! ```

mod agent;
mod containers;
pub mod error;
mod events;
mod nodes;
mod pipelines;
pub mod stream;

// Re-export commonly used types
pub use agent::AgentClient;
pub use error::{ClientError, Result};
pub use stream::JsonStream;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the Keel controller API
///
/// Methods are organized into logical groups:
/// - Node registration, heartbeats and queries
/// - Pipeline dispatch, status and cancellation on a node
/// - Container control on a node
/// - Event and log streams
#[derive(Debug, Clone)]
pub struct ControllerClient {
    /// Base URL of the controller (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
    /// Timeout applied to unary requests; streams are never cut short
    rpc_timeout: Option<Duration>,
}

impl ControllerClient {
    /// Create a new controller client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the controller API (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new controller client with a custom HTTP client
    ///
    /// This allows you to configure proxies, TLS settings, connect timeouts, etc.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the controller API
    /// * `client` - A configured reqwest Client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            rpc_timeout: None,
        }
    }

    /// Bound every unary request by `timeout`
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    /// Get the base URL of the controller
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn unary(&self, builder: RequestBuilder) -> RequestBuilder {
        apply_timeout(builder, self.rpc_timeout)
    }
}

pub(crate) fn apply_timeout(builder: RequestBuilder, timeout: Option<Duration>) -> RequestBuilder {
    match timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    }
}

// =============================================================================
// Response Handlers
// =============================================================================

/// Handle an API response and deserialize JSON
///
/// This checks the status code and returns an appropriate error if the
/// request failed, or deserializes the response body if successful.
pub(crate) async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Handle an API response whose body is not needed
pub(crate) async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    check_status(response).await.map(|_| ())
}

/// Turn a non-success status into a [`ClientError`]
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::debug!(status = status.as_u16(), body = %error_text, "request failed");
        return Err(ClientError::api_error(
            status.as_u16(),
            error::extract_message(&error_text),
        ));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ControllerClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert!(client.rpc_timeout.is_none());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ControllerClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_custom_client() {
        let client = ControllerClient::with_client("http://localhost:8080", Client::new())
            .with_rpc_timeout(Duration::from_secs(5));
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.rpc_timeout, Some(Duration::from_secs(5)));
    }
}
