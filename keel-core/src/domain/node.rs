//! Node domain model
//!
//! Describes a worker node as it declares itself at registration and as it
//! reports itself through heartbeats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static description a node sends when registering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    #[serde(default)]
    pub kernel: Option<String>,
    #[serde(default)]
    pub hardware: HardwareSummary,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Coarse hardware inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareSummary {
    #[serde(default)]
    pub cpu_model: Option<String>,
    pub cpu_cores: u32,
    pub memory_total_bytes: u64,
    #[serde(default)]
    pub disk_total_bytes: u64,
    #[serde(default)]
    pub gpus: Vec<String>,
}

/// Point-in-time resource usage of a node
///
/// Usage values are percentages in the range 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub disk_usage: f32,
    pub load_average: f32,
    pub container_count: u32,
    pub collected_at: DateTime<Utc>,
}

impl NodeMetrics {
    /// Render usage as the resource summary stored in the node directory
    pub fn resource_summary(&self) -> HashMap<String, String> {
        HashMap::from([
            ("CPU_Usage".to_string(), format!("{:.1}%", self.cpu_usage)),
            ("RAM_Usage".to_string(), format!("{:.1}%", self.memory_usage)),
            ("Disk_Usage".to_string(), format!("{:.1}%", self.disk_usage)),
        ])
    }
}

/// Coarse state of a node as tracked by the node directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Registered and able to accept pipelines
    Ready,

    /// Currently executing at least one pipeline
    Busy,

    /// Administratively drained
    Maintenance,

    /// Not heard from within the heartbeat window
    Offline,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Ready => write!(f, "Ready"),
            NodeState::Busy => write!(f, "Busy"),
            NodeState::Maintenance => write!(f, "Maintenance"),
            NodeState::Offline => write!(f, "Offline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_summary_formatting() {
        let metrics = NodeMetrics {
            cpu_usage: 12.345,
            memory_usage: 50.0,
            disk_usage: 0.06,
            load_average: 0.5,
            container_count: 2,
            collected_at: Utc::now(),
        };

        let summary = metrics.resource_summary();
        assert_eq!(summary["CPU_Usage"], "12.3%");
        assert_eq!(summary["RAM_Usage"], "50.0%");
        assert_eq!(summary["Disk_Usage"], "0.1%");
    }
}
