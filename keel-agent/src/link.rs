//! Agent-to-controller link
//!
//! The agent talks to the controller only through [`ControllerLink`], which is
//! implemented for [`ControllerClient`] and by test doubles.

use async_trait::async_trait;
use keel_client::{ClientError, ControllerClient};
use keel_core::domain::event::Event;
use keel_core::domain::node::NodeMetrics;
use keel_core::dto::node::{HeartbeatResponse, RegisterRequest, RegisterResponse};

/// Calls the agent makes to the controller
#[async_trait]
pub trait ControllerLink: Send + Sync {
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError>;

    async fn heartbeat(
        &self,
        node_id: &str,
        session_id: &str,
        metrics: Option<NodeMetrics>,
    ) -> Result<HeartbeatResponse, ClientError>;

    async fn forward_events(&self, node_id: &str, events: Vec<Event>) -> Result<(), ClientError>;
}

#[async_trait]
impl ControllerLink for ControllerClient {
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        ControllerClient::register(self, req).await
    }

    async fn heartbeat(
        &self,
        node_id: &str,
        session_id: &str,
        metrics: Option<NodeMetrics>,
    ) -> Result<HeartbeatResponse, ClientError> {
        ControllerClient::heartbeat(self, node_id, session_id, metrics).await
    }

    async fn forward_events(&self, node_id: &str, events: Vec<Event>) -> Result<(), ClientError> {
        ControllerClient::forward_events(self, node_id, events).await
    }
}
