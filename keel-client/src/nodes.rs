//! Node-related controller endpoints

use crate::error::Result;
use crate::{ControllerClient, handle_empty_response, handle_response};
use keel_core::domain::event::Event;
use keel_core::domain::node::NodeMetrics;
use keel_core::dto::event::EventBatch;
use keel_core::dto::node::{
    HeartbeatRequest, HeartbeatResponse, NodeMetricsResponse, NodeSummary, RegisterRequest,
    RegisterResponse,
};

impl ControllerClient {
    // =============================================================================
    // Node Registration & Lifecycle
    // =============================================================================

    /// Register a node with the controller
    ///
    /// A rejected registration (e.g. an empty node id) is reported through
    /// `success = false`, not as an error.
    ///
    /// # Arguments
    /// * `req` - Node id, hostname, agent URL and declared node info
    ///
    /// # Returns
    /// The session id issued for this registration
    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse> {
        let url = format!("{}/api/nodes/register", self.base_url);
        let response = self.unary(self.client.post(&url)).json(req).send().await?;

        handle_response(response).await
    }

    /// Send a heartbeat with the latest metrics
    ///
    /// # Returns
    /// `success = false` when the controller no longer knows this node
    pub async fn heartbeat(
        &self,
        node_id: &str,
        session_id: &str,
        metrics: Option<NodeMetrics>,
    ) -> Result<HeartbeatResponse> {
        let url = format!("{}/api/nodes/{}/heartbeat", self.base_url, node_id);
        let response = self
            .unary(self.client.post(&url))
            .json(&HeartbeatRequest {
                node_id: node_id.to_string(),
                session_id: session_id.to_string(),
                metrics,
            })
            .send()
            .await?;

        handle_response(response).await
    }

    /// Relay a batch of node events to the controller
    pub async fn forward_events(&self, node_id: &str, events: Vec<Event>) -> Result<()> {
        let url = format!("{}/api/nodes/{}/events", self.base_url, node_id);
        let response = self
            .unary(self.client.post(&url))
            .json(&EventBatch { events })
            .send()
            .await?;

        handle_empty_response(response).await
    }

    // =============================================================================
    // Node Query
    // =============================================================================

    /// List all live node connections
    pub async fn list_nodes(&self) -> Result<Vec<NodeSummary>> {
        let url = format!("{}/api/nodes", self.base_url);
        let response = self.unary(self.client.get(&url)).send().await?;

        handle_response(response).await
    }

    /// Get a single live node connection
    pub async fn get_node(&self, node_id: &str) -> Result<NodeSummary> {
        let url = format!("{}/api/nodes/{}", self.base_url, node_id);
        let response = self.unary(self.client.get(&url)).send().await?;

        handle_response(response).await
    }

    /// Latest metrics reported by a node
    pub async fn node_metrics(&self, node_id: &str) -> Result<NodeMetricsResponse> {
        let url = format!("{}/api/nodes/{}/metrics", self.base_url, node_id);
        let response = self.unary(self.client.get(&url)).send().await?;

        handle_response(response).await
    }
}
