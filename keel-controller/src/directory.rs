//! Node Directory
//!
//! Durable view of the fleet kept alongside the live connection map: which
//! nodes exist, whether they are online, their coarse state and their last
//! reported resources. The controller only ever writes to it; failures are
//! logged by the caller and never surface to agents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::domain::node::{NodeMetrics, NodeState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("node directory unavailable: {0}")]
    Unavailable(String),
}

/// Directory entry for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub state: NodeState,
    pub online: bool,
    pub metrics: Option<NodeMetrics>,
    pub resources: HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl NodeRecord {
    fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            state: NodeState::Offline,
            online: false,
            metrics: None,
            resources: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Storage seam for node records
///
/// Every update creates the record when it does not exist yet.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn get(&self, node_id: &str) -> Result<Option<NodeRecord>, DirectoryError>;

    async fn update_state(&self, node_id: &str, state: NodeState) -> Result<(), DirectoryError>;

    async fn update_metrics(
        &self,
        node_id: &str,
        metrics: &NodeMetrics,
    ) -> Result<(), DirectoryError>;

    async fn update_resources(
        &self,
        node_id: &str,
        resources: HashMap<String, String>,
    ) -> Result<(), DirectoryError>;

    async fn update_online_status(&self, node_id: &str, online: bool)
    -> Result<(), DirectoryError>;
}

/// Process-local directory
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    records: RwLock<HashMap<String, NodeRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, ordered by node id
    pub async fn list(&self) -> Vec<NodeRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        records
    }

    async fn upsert(&self, node_id: &str, apply: impl FnOnce(&mut NodeRecord)) {
        let mut records = self.records.write().await;
        let record = records
            .entry(node_id.to_string())
            .or_insert_with(|| NodeRecord::new(node_id));
        apply(record);
        record.updated_at = Utc::now();
    }
}

#[async_trait]
impl NodeDirectory for InMemoryDirectory {
    async fn get(&self, node_id: &str) -> Result<Option<NodeRecord>, DirectoryError> {
        Ok(self.records.read().await.get(node_id).cloned())
    }

    async fn update_state(&self, node_id: &str, state: NodeState) -> Result<(), DirectoryError> {
        self.upsert(node_id, |record| record.state = state).await;
        Ok(())
    }

    async fn update_metrics(
        &self,
        node_id: &str,
        metrics: &NodeMetrics,
    ) -> Result<(), DirectoryError> {
        let metrics = metrics.clone();
        self.upsert(node_id, |record| record.metrics = Some(metrics))
            .await;
        Ok(())
    }

    async fn update_resources(
        &self,
        node_id: &str,
        resources: HashMap<String, String>,
    ) -> Result<(), DirectoryError> {
        self.upsert(node_id, |record| record.resources.extend(resources))
            .await;
        Ok(())
    }

    async fn update_online_status(
        &self,
        node_id: &str,
        online: bool,
    ) -> Result<(), DirectoryError> {
        self.upsert(node_id, |record| record.online = online).await;
        Ok(())
    }
}
