//! Agent Gateway
//!
//! Every call the controller makes to an agent goes through
//! [`AgentGateway`]. The HTTP implementation builds a short-lived
//! [`AgentClient`] per call on a shared connection pool.

use async_trait::async_trait;
use keel_client::{AgentClient, ClientError, JsonStream};
use keel_core::domain::log::LogEntry;
use keel_core::domain::pipeline::PipelineStatus;
use keel_core::dto::container::{ContainerAction, ContainerActionResponse, LogQuery};
use keel_core::dto::pipeline::{
    CancelPipelineResponse, ExecutePipelineRequest, ExecutePipelineResponse,
};
use std::time::Duration;

#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn execute_pipeline(
        &self,
        agent_url: &str,
        req: &ExecutePipelineRequest,
    ) -> Result<ExecutePipelineResponse, ClientError>;

    async fn pipeline_status(
        &self,
        agent_url: &str,
        execution_id: &str,
    ) -> Result<PipelineStatus, ClientError>;

    async fn cancel_pipeline(
        &self,
        agent_url: &str,
        execution_id: &str,
        reason: Option<String>,
    ) -> Result<CancelPipelineResponse, ClientError>;

    async fn container_action(
        &self,
        agent_url: &str,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerActionResponse, ClientError>;

    async fn stream_node_logs(&self, agent_url: &str)
    -> Result<JsonStream<LogEntry>, ClientError>;

    async fn stream_container_logs(
        &self,
        agent_url: &str,
        container_id: &str,
        query: &LogQuery,
    ) -> Result<JsonStream<LogEntry>, ClientError>;
}

/// Gateway speaking the agent HTTP API
#[derive(Debug, Clone)]
pub struct HttpAgentGateway {
    http: reqwest::Client,
    rpc_timeout: Duration,
}

impl HttpAgentGateway {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_timeout,
        }
    }

    fn client(&self, agent_url: &str) -> AgentClient {
        AgentClient::with_client(agent_url, self.http.clone()).with_rpc_timeout(self.rpc_timeout)
    }
}

#[async_trait]
impl AgentGateway for HttpAgentGateway {
    async fn execute_pipeline(
        &self,
        agent_url: &str,
        req: &ExecutePipelineRequest,
    ) -> Result<ExecutePipelineResponse, ClientError> {
        self.client(agent_url).execute_pipeline(req).await
    }

    async fn pipeline_status(
        &self,
        agent_url: &str,
        execution_id: &str,
    ) -> Result<PipelineStatus, ClientError> {
        self.client(agent_url).pipeline_status(execution_id).await
    }

    async fn cancel_pipeline(
        &self,
        agent_url: &str,
        execution_id: &str,
        reason: Option<String>,
    ) -> Result<CancelPipelineResponse, ClientError> {
        self.client(agent_url)
            .cancel_pipeline(execution_id, reason)
            .await
    }

    async fn container_action(
        &self,
        agent_url: &str,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerActionResponse, ClientError> {
        self.client(agent_url)
            .container_action(container_id, action)
            .await
    }

    async fn stream_node_logs(
        &self,
        agent_url: &str,
    ) -> Result<JsonStream<LogEntry>, ClientError> {
        self.client(agent_url).stream_logs().await
    }

    async fn stream_container_logs(
        &self,
        agent_url: &str,
        container_id: &str,
        query: &LogQuery,
    ) -> Result<JsonStream<LogEntry>, ClientError> {
        self.client(agent_url)
            .stream_container_logs(container_id, query)
            .await
    }
}
