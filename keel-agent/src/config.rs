//! Agent configuration
//!
//! Defines all configurable parameters for the node agent including
//! heartbeat and metrics cadence, reconnect policy, and controller
//! connection settings.

use std::collections::HashMap;
use std::time::Duration;

/// Agent configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this node
    pub node_id: String,

    /// Controller base URL (e.g., "http://localhost:8080")
    pub controller_url: String,

    /// Address the agent API listens on
    pub bind_addr: String,

    /// URL the controller uses to reach this agent; derived from
    /// `bind_addr` and the hostname when unset
    pub advertise_url: Option<String>,

    /// How often to send a heartbeat to the controller
    pub heartbeat_interval: Duration,

    /// How often to sample node metrics
    pub metrics_interval: Duration,

    /// Timeout for a single registration or heartbeat call
    pub rpc_timeout: Duration,

    /// Register attempts per reconnect sequence
    pub max_reconnect_attempts: u32,

    /// Fixed pause between reconnect attempts
    pub reconnect_interval: Duration,

    /// Container engine binary (podman or docker)
    pub container_engine: String,

    /// How long `stop` waits for background tasks
    pub shutdown_grace: Duration,

    /// Finished executions kept queryable; older ones are forgotten
    pub retained_executions: usize,

    /// Free-form labels reported at registration (e.g., env=prod)
    pub labels: HashMap<String, String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(node_id: String, controller_url: String) -> Self {
        Self {
            node_id,
            controller_url,
            bind_addr: "0.0.0.0:7070".to_string(),
            advertise_url: None,
            heartbeat_interval: Duration::from_secs(15),
            metrics_interval: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            reconnect_interval: Duration::from_secs(5),
            container_engine: "podman".to_string(),
            shutdown_grace: Duration::from_secs(10),
            retained_executions: 100,
            labels: HashMap::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KEEL_NODE_ID (required)
    /// - KEEL_CONTROLLER_URL (required)
    /// - KEEL_AGENT_BIND_ADDR (optional, default: 0.0.0.0:7070)
    /// - KEEL_AGENT_ADVERTISE_URL (optional)
    /// - KEEL_HEARTBEAT_INTERVAL (optional, seconds, default: 15)
    /// - KEEL_METRICS_INTERVAL (optional, seconds, default: 10)
    /// - KEEL_RPC_TIMEOUT (optional, seconds, default: 5)
    /// - KEEL_MAX_RECONNECT_ATTEMPTS (optional, default: 5)
    /// - KEEL_RECONNECT_INTERVAL (optional, seconds, default: 5)
    /// - KEEL_CONTAINER_ENGINE (optional, default: podman)
    /// - KEEL_SHUTDOWN_GRACE (optional, seconds, default: 10)
    /// - KEEL_RETAINED_EXECUTIONS (optional, default: 100)
    /// - KEEL_NODE_LABELS (optional, comma separated key=value pairs)
    pub fn from_env() -> anyhow::Result<Self> {
        let node_id = std::env::var("KEEL_NODE_ID")
            .map_err(|_| anyhow::anyhow!("KEEL_NODE_ID environment variable not set"))?;

        let controller_url = std::env::var("KEEL_CONTROLLER_URL")
            .map_err(|_| anyhow::anyhow!("KEEL_CONTROLLER_URL environment variable not set"))?;

        let mut config = Self::new(node_id, controller_url);

        if let Ok(addr) = std::env::var("KEEL_AGENT_BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.advertise_url = std::env::var("KEEL_AGENT_ADVERTISE_URL").ok();

        config.heartbeat_interval = env_secs("KEEL_HEARTBEAT_INTERVAL", config.heartbeat_interval);
        config.metrics_interval = env_secs("KEEL_METRICS_INTERVAL", config.metrics_interval);
        config.rpc_timeout = env_secs("KEEL_RPC_TIMEOUT", config.rpc_timeout);
        config.reconnect_interval = env_secs("KEEL_RECONNECT_INTERVAL", config.reconnect_interval);
        config.shutdown_grace = env_secs("KEEL_SHUTDOWN_GRACE", config.shutdown_grace);

        config.max_reconnect_attempts = std::env::var("KEEL_MAX_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(config.max_reconnect_attempts);

        config.retained_executions = std::env::var("KEEL_RETAINED_EXECUTIONS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(config.retained_executions);

        if let Ok(engine) = std::env::var("KEEL_CONTAINER_ENGINE") {
            config.container_engine = engine;
        }

        if let Ok(labels) = std::env::var("KEEL_NODE_LABELS") {
            config.labels = parse_labels(&labels);
        }

        Ok(config)
    }

    /// Adds a label reported at registration
    pub fn with_label(mut self, key: String, value: String) -> Self {
        self.labels.insert(key, value);
        self
    }

    /// URL advertised to the controller at registration
    pub fn agent_url(&self, hostname: &str) -> String {
        if let Some(url) = &self.advertise_url {
            return url.trim_end_matches('/').to_string();
        }

        let port = self
            .bind_addr
            .rsplit_once(':')
            .map(|(_, port)| port)
            .unwrap_or("7070");
        let host = match self.bind_addr.rsplit_once(':').map(|(host, _)| host) {
            Some("0.0.0.0") | Some("[::]") | Some("") | None => hostname,
            Some(host) => host,
        };
        format!("http://{}:{}", host, port)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.trim().is_empty() {
            anyhow::bail!("node_id cannot be empty");
        }

        if self.controller_url.is_empty() {
            anyhow::bail!("controller_url cannot be empty");
        }

        if !self.controller_url.starts_with("http://")
            && !self.controller_url.starts_with("https://")
        {
            anyhow::bail!("controller_url must start with http:// or https://");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            anyhow::bail!("metrics_interval must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            anyhow::bail!("rpc_timeout must be greater than 0");
        }

        if self.max_reconnect_attempts == 0 {
            anyhow::bail!("max_reconnect_attempts must be greater than 0");
        }

        if self.retained_executions == 0 {
            anyhow::bail!("retained_executions must be greater than 0");
        }

        if self.container_engine.trim().is_empty() {
            anyhow::bail!("container_engine cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_node_id(), "http://localhost:8080".to_string())
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn parse_labels(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Hostname of this machine, or a random id when it cannot be determined
pub fn default_node_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
