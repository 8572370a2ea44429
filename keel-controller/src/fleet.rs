//! Fleet controller
//!
//! Tracks one live connection per registered node and routes every request
//! aimed at a node to the agent running on it. A node stays connected for
//! as long as its heartbeats keep arriving; the sweep evicts nodes whose
//! last heartbeat is older than `max_heartbeat_age`.
//!
//! The connection map is only ever locked for map bookkeeping. Calls to
//! agents and to the node directory happen after the lock is released.

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::{Stream, StreamExt};
use keel_client::{ClientError, JsonStream};
use keel_core::domain::event::{Event, EventType, status as code};
use keel_core::domain::log::LogEntry;
use keel_core::domain::node::{NodeInfo, NodeMetrics, NodeState};
use keel_core::domain::pipeline::PipelineStatus;
use keel_core::dto::container::{ContainerAction, ContainerActionResponse, LogQuery};
use keel_core::dto::node::{
    HeartbeatRequest, HeartbeatResponse, NodeMetricsResponse, NodeSummary, RegisterRequest,
    RegisterResponse,
};
use keel_core::dto::pipeline::{
    CancelPipelineResponse, ExecutePipelineRequest, ExecutePipelineResponse,
};
use keel_core::event_bus::{EventBus, Subscription};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::directory::{DirectoryError, NodeDirectory};
use crate::gateway::AgentGateway;

/// Stream of log entries relayed from an agent
pub type LogStream = Pin<Box<dyn Stream<Item = LogEntry> + Send>>;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("node not registered: {0}")]
    NotRegistered(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("agent on node {node_id} failed: {source}")]
    Agent {
        node_id: String,
        #[source]
        source: ClientError,
    },
}

impl FleetError {
    fn agent(node_id: &str, source: ClientError) -> Self {
        FleetError::Agent {
            node_id: node_id.to_string(),
            source,
        }
    }
}

/// Live state of one registered node
pub struct NodeConnection {
    pub node_id: String,
    pub session_id: String,
    pub hostname: String,
    pub agent_url: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub info: NodeInfo,
    pub metrics: Option<NodeMetrics>,
    events: EventBus,
}

impl NodeConnection {
    fn new(req: RegisterRequest, session_id: String) -> Self {
        let now = Utc::now();
        Self {
            node_id: req.node_id,
            session_id,
            hostname: req.hostname,
            agent_url: req.agent_url,
            registered_at: now,
            last_seen_at: now,
            info: req.node_info,
            metrics: None,
            events: EventBus::new(),
        }
    }

    fn summary(&self) -> NodeSummary {
        NodeSummary {
            node_id: self.node_id.clone(),
            session_id: self.session_id.clone(),
            hostname: self.hostname.clone(),
            agent_url: self.agent_url.clone(),
            registered_at: self.registered_at,
            last_seen_at: self.last_seen_at,
            info: self.info.clone(),
            metrics: self.metrics.clone(),
            subscriber_count: self.events.subscriber_count(),
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
        now.signed_duration_since(self.last_seen_at) > max_age
    }
}

pub struct FleetController {
    config: Config,
    connections: RwLock<HashMap<String, NodeConnection>>,
    directory: Arc<dyn NodeDirectory>,
    gateway: Arc<dyn AgentGateway>,
}

impl FleetController {
    pub fn new(
        config: Config,
        directory: Arc<dyn NodeDirectory>,
        gateway: Arc<dyn AgentGateway>,
    ) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            directory,
            gateway,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =============================================================================
    // Registration & Liveness
    // =============================================================================

    /// Register a node, or refresh the session of one already connected
    ///
    /// Re-registration issues a new session and resets the heartbeat clock;
    /// event subscribers of the node stay attached.
    ///
    /// # Returns
    /// `success=false` when the node id is empty
    pub async fn register(&self, req: RegisterRequest) -> RegisterResponse {
        if req.node_id.trim().is_empty() {
            warn!("Rejected registration without a node id");
            return RegisterResponse {
                session_id: String::new(),
                success: false,
                message: "node id must not be empty".to_string(),
            };
        }

        let node_id = req.node_id.clone();
        let session_id = format!("{}-{}", node_id, uuid::Uuid::new_v4().simple());

        let reregistered = {
            let mut connections = self.connections.write().await;
            match connections.get_mut(&node_id) {
                Some(conn) => {
                    let now = Utc::now();
                    conn.session_id = session_id.clone();
                    conn.hostname = req.hostname;
                    conn.agent_url = req.agent_url;
                    conn.info = req.node_info;
                    conn.registered_at = now;
                    conn.last_seen_at = now;
                    true
                }
                None => {
                    connections.insert(node_id.clone(), NodeConnection::new(req, session_id.clone()));
                    false
                }
            }
        };

        if reregistered {
            info!("Node {} re-registered with session {}", node_id, session_id);
        } else {
            info!("Node {} registered with session {}", node_id, session_id);
        }

        record(
            "mark online",
            &node_id,
            self.directory.update_online_status(&node_id, true).await,
        );
        record(
            "mark ready",
            &node_id,
            self.directory.update_state(&node_id, NodeState::Ready).await,
        );

        RegisterResponse {
            session_id,
            success: true,
            message: "registered".to_string(),
        }
    }

    /// Record a heartbeat and cache the metrics it carries
    ///
    /// Heartbeats from unknown nodes or from a superseded session are
    /// answered with `success=false`, which tells the agent to register
    /// again.
    pub async fn heartbeat(&self, req: HeartbeatRequest) -> HeartbeatResponse {
        let accepted = {
            let mut connections = self.connections.write().await;
            match connections.get_mut(&req.node_id) {
                Some(conn) if conn.session_id == req.session_id => {
                    conn.last_seen_at = Utc::now();
                    if let Some(metrics) = &req.metrics {
                        conn.metrics = Some(metrics.clone());
                    }
                    true
                }
                Some(_) => {
                    warn!(
                        "Heartbeat from node {} carries stale session {}",
                        req.node_id, req.session_id
                    );
                    false
                }
                None => {
                    warn!("Heartbeat from unknown node {}", req.node_id);
                    false
                }
            }
        };

        if accepted {
            debug!("Heartbeat from node {}", req.node_id);
            if let Some(metrics) = &req.metrics {
                record(
                    "store metrics",
                    &req.node_id,
                    self.directory.update_metrics(&req.node_id, metrics).await,
                );
                record(
                    "store resources",
                    &req.node_id,
                    self.directory
                        .update_resources(&req.node_id, metrics.resource_summary())
                        .await,
                );
            }
        }

        HeartbeatResponse {
            success: accepted,
            server_time: Utc::now(),
        }
    }

    /// Evict every node whose last heartbeat is older than `max_heartbeat_age`
    ///
    /// Subscribers of an evicted node receive a final `disconnected` event,
    /// then their streams end.
    ///
    /// # Returns
    /// The ids of the evicted nodes
    pub async fn sweep(&self) -> Vec<String> {
        self.evict_stale(Utc::now()).await
    }

    pub(crate) async fn evict_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let max_age = TimeDelta::from_std(self.config.max_heartbeat_age).unwrap_or(TimeDelta::MAX);

        let evicted: Vec<NodeConnection> = {
            let mut connections = self.connections.write().await;
            let stale: Vec<String> = connections
                .values()
                .filter(|conn| conn.is_stale(now, max_age))
                .map(|conn| conn.node_id.clone())
                .collect();
            stale
                .iter()
                .filter_map(|id| connections.remove(id))
                .collect()
        };

        if evicted.is_empty() {
            return Vec::new();
        }

        let mut ids = Vec::with_capacity(evicted.len());
        for conn in evicted {
            warn!(
                "Evicting node {}: last heartbeat at {}",
                conn.node_id, conn.last_seen_at
            );
            conn.events.publish(Event::node(
                conn.node_id.clone(),
                code::DISCONNECTED,
                "heartbeat timed out",
            ));

            record(
                "mark offline",
                &conn.node_id,
                self.directory
                    .update_online_status(&conn.node_id, false)
                    .await,
            );
            record(
                "mark offline",
                &conn.node_id,
                self.directory
                    .update_state(&conn.node_id, NodeState::Offline)
                    .await,
            );
            ids.push(conn.node_id);
        }

        info!("Evicted {} stale node(s)", ids.len());
        ids
    }

    /// Run the eviction sweep every `sweep_interval` until `cancel` fires
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        debug!("Sweeper stopped");
    }

    // =============================================================================
    // Events
    // =============================================================================

    /// Deliver events relayed by a node to that node's subscribers
    ///
    /// Events for which no subscriber exists are discarded.
    ///
    /// # Returns
    /// The number of deliveries made
    pub async fn forward_events(
        &self,
        node_id: &str,
        events: Vec<Event>,
    ) -> Result<usize, FleetError> {
        let bus = {
            let connections = self.connections.read().await;
            connections
                .get(node_id)
                .map(|conn| conn.events.clone())
                .ok_or_else(|| FleetError::NotRegistered(node_id.to_string()))?
        };

        let count = events.len();
        let delivered: usize = events
            .into_iter()
            .filter(|event| {
                if event.node_id != node_id {
                    warn!(
                        "Node {} relayed an event of node {}, dropping it",
                        node_id, event.node_id
                    );
                    return false;
                }
                true
            })
            .map(|event| bus.publish(event))
            .sum();

        debug!(
            "Forwarded {} event(s) from node {} ({} deliveries)",
            count, node_id, delivered
        );
        Ok(delivered)
    }

    /// Subscribe to the events a node relays
    ///
    /// An empty `types` slice subscribes to every type. The subscription
    /// survives re-registration and ends when the node is evicted.
    pub async fn subscribe_events(
        &self,
        node_id: &str,
        types: &[EventType],
    ) -> Result<Subscription, FleetError> {
        let connections = self.connections.read().await;
        let conn = connections
            .get(node_id)
            .ok_or_else(|| FleetError::NotRegistered(node_id.to_string()))?;

        debug!("New event subscriber for node {}: {:?}", node_id, types);
        Ok(conn.events.subscribe(types))
    }

    // =============================================================================
    // Queries
    // =============================================================================

    /// Snapshot of every connected node, ordered by node id
    pub async fn list_nodes(&self) -> Vec<NodeSummary> {
        let mut nodes: Vec<NodeSummary> = self
            .connections
            .read()
            .await
            .values()
            .map(NodeConnection::summary)
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub async fn get_node(&self, node_id: &str) -> Result<NodeSummary, FleetError> {
        self.connections
            .read()
            .await
            .get(node_id)
            .map(NodeConnection::summary)
            .ok_or_else(|| FleetError::NotRegistered(node_id.to_string()))
    }

    /// Metrics carried by the node's latest heartbeat
    ///
    /// Answered from the cache; the agent is not contacted.
    pub async fn get_node_metrics(&self, node_id: &str) -> Result<NodeMetricsResponse, FleetError> {
        let connections = self.connections.read().await;
        let conn = connections
            .get(node_id)
            .ok_or_else(|| FleetError::NotRegistered(node_id.to_string()))?;

        Ok(NodeMetricsResponse {
            node_id: node_id.to_string(),
            metrics: conn.metrics.clone(),
        })
    }

    async fn agent_url(&self, node_id: &str) -> Result<String, FleetError> {
        self.connections
            .read()
            .await
            .get(node_id)
            .map(|conn| conn.agent_url.clone())
            .ok_or_else(|| FleetError::NotRegistered(node_id.to_string()))
    }

    // =============================================================================
    // Pipelines
    // =============================================================================

    /// Dispatch a pipeline to the node named in the request
    ///
    /// # Returns
    /// `accepted=false` when the node is not registered, otherwise the
    /// agent's answer
    pub async fn execute_pipeline(
        &self,
        req: ExecutePipelineRequest,
    ) -> Result<ExecutePipelineResponse, FleetError> {
        let node_id = req.node_id.clone();
        let agent_url = match self.agent_url(&node_id).await {
            Ok(url) => url,
            Err(e) => {
                warn!("Not dispatching pipeline {}: {}", req.pipeline.id, e);
                return Ok(ExecutePipelineResponse {
                    execution_id: String::new(),
                    accepted: false,
                    message: e.to_string(),
                });
            }
        };

        info!(
            "Dispatching pipeline {} to node {}",
            req.pipeline.id, node_id
        );
        let resp = self
            .gateway
            .execute_pipeline(&agent_url, &req)
            .await
            .map_err(|e| FleetError::agent(&node_id, e))?;

        if resp.accepted {
            info!(
                "Node {} accepted pipeline as execution {}",
                node_id, resp.execution_id
            );
        } else {
            warn!("Node {} refused pipeline: {}", node_id, resp.message);
        }
        Ok(resp)
    }

    pub async fn get_pipeline_status(
        &self,
        node_id: &str,
        execution_id: &str,
    ) -> Result<PipelineStatus, FleetError> {
        let agent_url = self.agent_url(node_id).await?;
        self.gateway
            .pipeline_status(&agent_url, execution_id)
            .await
            .map_err(|e| FleetError::agent(node_id, e))
    }

    /// Ask the owning agent to cancel an execution
    pub async fn cancel_pipeline(
        &self,
        node_id: &str,
        execution_id: &str,
        reason: Option<String>,
    ) -> Result<CancelPipelineResponse, FleetError> {
        let agent_url = self.agent_url(node_id).await?;
        info!(
            "Canceling execution {} on node {}",
            execution_id, node_id
        );
        self.gateway
            .cancel_pipeline(&agent_url, execution_id, reason)
            .await
            .map_err(|e| FleetError::agent(node_id, e))
    }

    // =============================================================================
    // Containers & Logs
    // =============================================================================

    pub async fn start_container(
        &self,
        node_id: &str,
        container_id: &str,
    ) -> Result<ContainerActionResponse, FleetError> {
        self.container_action(node_id, container_id, ContainerAction::Start)
            .await
    }

    pub async fn stop_container(
        &self,
        node_id: &str,
        container_id: &str,
    ) -> Result<ContainerActionResponse, FleetError> {
        self.container_action(node_id, container_id, ContainerAction::Stop)
            .await
    }

    pub async fn restart_container(
        &self,
        node_id: &str,
        container_id: &str,
    ) -> Result<ContainerActionResponse, FleetError> {
        self.container_action(node_id, container_id, ContainerAction::Restart)
            .await
    }

    pub async fn container_action(
        &self,
        node_id: &str,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerActionResponse, FleetError> {
        if container_id.trim().is_empty() {
            return Err(FleetError::InvalidRequest(
                "container id must not be empty".to_string(),
            ));
        }

        let agent_url = self.agent_url(node_id).await?;
        info!(
            "Container {} on node {}: {}",
            container_id,
            node_id,
            action.as_str()
        );
        self.gateway
            .container_action(&agent_url, container_id, action)
            .await
            .map_err(|e| FleetError::agent(node_id, e))
    }

    /// Relay the node's log stream
    ///
    /// The stream ends when the agent closes it or the connection fails.
    pub async fn stream_node_logs(&self, node_id: &str) -> Result<LogStream, FleetError> {
        let agent_url = self.agent_url(node_id).await?;
        let entries = self
            .gateway
            .stream_node_logs(&agent_url)
            .await
            .map_err(|e| FleetError::agent(node_id, e))?;

        Ok(until_error(node_id.to_string(), entries))
    }

    /// Relay a container's output from the node running it
    pub async fn stream_container_logs(
        &self,
        node_id: &str,
        container_id: &str,
        query: &LogQuery,
    ) -> Result<LogStream, FleetError> {
        let agent_url = self.agent_url(node_id).await?;
        let entries = self
            .gateway
            .stream_container_logs(&agent_url, container_id, query)
            .await
            .map_err(|e| FleetError::agent(node_id, e))?;

        Ok(until_error(node_id.to_string(), entries))
    }
}

/// Yield entries until the first transport or decode error
fn until_error(node_id: String, entries: JsonStream<LogEntry>) -> LogStream {
    let entries = entries
        .take_while(move |entry| {
            if let Err(e) = entry {
                warn!("Log stream from node {} ended: {}", node_id, e);
            }
            std::future::ready(entry.is_ok())
        })
        .filter_map(|entry| std::future::ready(entry.ok()));

    Box::pin(entries)
}

fn record(action: &str, node_id: &str, result: Result<(), DirectoryError>) {
    if let Err(e) = result {
        warn!("Node directory: failed to {} node {}: {}", action, node_id, e);
    }
}
