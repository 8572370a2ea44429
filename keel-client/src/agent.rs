//! Client for the API an agent serves on its node

use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use crate::error::Result;
use crate::events::join_types;
use crate::stream::{self, JsonStream};
use crate::{apply_timeout, check_status, handle_response};
use keel_core::domain::event::{Event, EventType};
use keel_core::domain::log::LogEntry;
use keel_core::domain::pipeline::PipelineStatus;
use keel_core::dto::container::{ContainerAction, ContainerActionResponse, LogQuery};
use keel_core::dto::node::NodeMetricsResponse;
use keel_core::dto::pipeline::{
    CancelPipelineRequest, CancelPipelineResponse, ExecutePipelineRequest,
    ExecutePipelineResponse,
};

/// HTTP client for a single agent
#[derive(Debug, Clone)]
pub struct AgentClient {
    base_url: String,
    client: Client,
    rpc_timeout: Option<Duration>,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create an agent client sharing an existing connection pool
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

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn unary(&self, builder: RequestBuilder) -> RequestBuilder {
        apply_timeout(builder, self.rpc_timeout)
    }

    // =============================================================================
    // Pipelines
    // =============================================================================

    pub async fn execute_pipeline(
        &self,
        req: &ExecutePipelineRequest,
    ) -> Result<ExecutePipelineResponse> {
        let url = format!("{}/api/pipelines", self.base_url);
        let response = self.unary(self.client.post(&url)).json(req).send().await?;

        handle_response(response).await
    }

    pub async fn pipeline_status(&self, execution_id: &str) -> Result<PipelineStatus> {
        let url = format!("{}/api/pipelines/{}", self.base_url, execution_id);
        let response = self.unary(self.client.get(&url)).send().await?;

        handle_response(response).await
    }

    pub async fn cancel_pipeline(
        &self,
        execution_id: &str,
        reason: Option<String>,
    ) -> Result<CancelPipelineResponse> {
        let url = format!("{}/api/pipelines/{}/cancel", self.base_url, execution_id);
        let response = self
            .unary(self.client.post(&url))
            .json(&CancelPipelineRequest { reason })
            .send()
            .await?;

        handle_response(response).await
    }

    // =============================================================================
    // Containers & Metrics
    // =============================================================================

    pub async fn container_action(
        &self,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerActionResponse> {
        let url = format!(
            "{}/api/containers/{}/{}",
            self.base_url,
            container_id,
            action.as_str()
        );
        let response = self.unary(self.client.post(&url)).send().await?;

        handle_response(response).await
    }

    pub async fn metrics(&self) -> Result<NodeMetricsResponse> {
        let url = format!("{}/api/metrics", self.base_url);
        let response = self.unary(self.client.get(&url)).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Streams
    // =============================================================================

    pub async fn stream_logs(&self) -> Result<JsonStream<LogEntry>> {
        let url = format!("{}/api/logs", self.base_url);
        let response = check_status(self.client.get(&url).send().await?).await?;

        Ok(stream::from_response(response))
    }

    pub async fn stream_container_logs(
        &self,
        container_id: &str,
        query: &LogQuery,
    ) -> Result<JsonStream<LogEntry>> {
        let url = format!("{}/api/containers/{}/logs", self.base_url, container_id);
        let response = check_status(self.client.get(&url).query(query).send().await?).await?;

        Ok(stream::from_response(response))
    }

    pub async fn subscribe_events(&self, types: &[EventType]) -> Result<JsonStream<Event>> {
        let url = format!("{}/api/events", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("types", join_types(types))])
            .send()
            .await?;

        Ok(stream::from_response(check_status(response).await?))
    }
}
