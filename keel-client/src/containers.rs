//! Container-related controller endpoints

use crate::error::Result;
use crate::stream::{self, JsonStream};
use crate::{ControllerClient, check_status, handle_response};
use keel_core::domain::log::LogEntry;
use keel_core::dto::container::{ContainerAction, ContainerActionResponse, LogQuery};

impl ControllerClient {
    // =============================================================================
    // Container Control
    // =============================================================================

    /// Start, stop or restart a container on a node
    pub async fn container_action(
        &self,
        node_id: &str,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerActionResponse> {
        let url = format!(
            "{}/api/nodes/{}/containers/{}/{}",
            self.base_url,
            node_id,
            container_id,
            action.as_str()
        );
        let response = self.unary(self.client.post(&url)).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Log Streams
    // =============================================================================

    /// Stream a node's agent and workload log lines
    ///
    /// The stream stays open until the node disconnects or it is dropped.
    pub async fn stream_node_logs(&self, node_id: &str) -> Result<JsonStream<LogEntry>> {
        let url = format!("{}/api/nodes/{}/logs", self.base_url, node_id);
        let response = check_status(self.client.get(&url).send().await?).await?;

        Ok(stream::from_response(response))
    }

    /// Stream a container's output
    pub async fn stream_container_logs(
        &self,
        node_id: &str,
        container_id: &str,
        query: &LogQuery,
    ) -> Result<JsonStream<LogEntry>> {
        let url = format!(
            "{}/api/nodes/{}/containers/{}/logs",
            self.base_url, node_id, container_id
        );
        let response = check_status(self.client.get(&url).query(query).send().await?).await?;

        Ok(stream::from_response(response))
    }
}
