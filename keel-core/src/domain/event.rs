//! Event domain types
//!
//! Events are immutable notifications of node, pipeline and container state
//! changes. They are cloned across channel boundaries, never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Node,
    Pipeline,
    Container,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Node, EventType::Pipeline, EventType::Container];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Node => "node",
            EventType::Pipeline => "pipeline",
            EventType::Container => "container",
        }
    }

    /// Parse a comma separated list such as `"pipeline,container"`
    ///
    /// An empty list means every type.
    pub fn parse_list(list: &str) -> Result<Vec<EventType>, String> {
        let types = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if types.is_empty() {
            Ok(Self::ALL.to_vec())
        } else {
            Ok(types)
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" => Ok(EventType::Node),
            "pipeline" => Ok(EventType::Pipeline),
            "container" => Ok(EventType::Container),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

/// Short status codes carried by events
pub mod status {
    // node
    pub const REGISTERED: &str = "registered";
    pub const DISCONNECTED: &str = "disconnected";
    pub const RECONNECTED: &str = "reconnected";
    pub const RECONNECT_FAILED: &str = "reconnect_failed";
    pub const STOPPED: &str = "stopped";

    // pipeline
    pub const STARTED: &str = "started";
    pub const STEP_STARTED: &str = "step_started";
    pub const STEP_COMPLETED: &str = "step_completed";
    pub const STEP_FAILED: &str = "step_failed";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const CANCELED: &str = "canceled";

    // container
    pub const CREATED: &str = "created";
    pub const RUNNING: &str = "running";
    pub const EXITED: &str = "exited";
    pub const REMOVED: &str = "removed";
    pub const RESTARTED: &str = "restarted";
    pub const LOG: &str = "log";
}

/// A state change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub node_id: String,
    /// Pipeline or container id, empty for node-level events
    #[serde(default)]
    pub entity_id: String,
    pub status: String,
    #[serde(default)]
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        node_id: impl Into<String>,
        entity_id: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            node_id: node_id.into(),
            entity_id: entity_id.into(),
            status: status.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn node(node_id: impl Into<String>, status: &str, message: impl Into<String>) -> Self {
        Self::new(EventType::Node, node_id, "", status, message)
    }

    pub fn pipeline(
        node_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        status: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(EventType::Pipeline, node_id, pipeline_id, status, message)
    }

    pub fn container(
        node_id: impl Into<String>,
        container_id: impl Into<String>,
        status: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(EventType::Container, node_id, container_id, status, message)
    }
}
