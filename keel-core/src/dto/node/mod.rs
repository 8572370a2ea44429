//! Node DTOs
//!
//! Data transfer objects for registration, heartbeats and node queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::node::{NodeInfo, NodeMetrics};

/// Request to register a node with the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_id: String,
    pub hostname: String,

    /// Base URL the controller uses to reach this node's agent
    pub agent_url: String,

    #[serde(default)]
    pub node_info: NodeInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub session_id: String,
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub session_id: String,
    #[serde(default)]
    pub metrics: Option<NodeMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub server_time: DateTime<Utc>,
}

/// Latest metrics for a node, `None` until one has been collected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetricsResponse {
    pub node_id: String,
    pub metrics: Option<NodeMetrics>,
}

/// Snapshot of a live node connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: String,
    pub session_id: String,
    pub hostname: String,
    pub agent_url: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub info: NodeInfo,
    pub metrics: Option<NodeMetrics>,
    pub subscriber_count: usize,
}
