//! Controller configuration
//!
//! Bind address, heartbeat eviction window, and the timeouts used when the
//! controller calls out to agents.

use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the controller API listens on
    pub bind_addr: String,

    /// A node whose last heartbeat is older than this is evicted
    pub max_heartbeat_age: Duration,

    /// How often the eviction sweep runs
    pub sweep_interval: Duration,

    /// Timeout for unary calls to an agent
    pub agent_rpc_timeout: Duration,

    /// How long shutdown waits for background tasks
    pub shutdown_grace: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(bind_addr: String) -> Self {
        Self {
            bind_addr,
            max_heartbeat_age: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            agent_rpc_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KEEL_CONTROLLER_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - KEEL_MAX_HEARTBEAT_AGE (optional, seconds, default: 30)
    /// - KEEL_SWEEP_INTERVAL (optional, seconds, default: 10)
    /// - KEEL_AGENT_RPC_TIMEOUT (optional, seconds, default: 10)
    /// - KEEL_SHUTDOWN_GRACE (optional, seconds, default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = std::env::var("KEEL_CONTROLLER_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let mut config = Self::new(bind_addr);
        config.max_heartbeat_age = env_secs("KEEL_MAX_HEARTBEAT_AGE", config.max_heartbeat_age)?;
        config.sweep_interval = env_secs("KEEL_SWEEP_INTERVAL", config.sweep_interval)?;
        config.agent_rpc_timeout = env_secs("KEEL_AGENT_RPC_TIMEOUT", config.agent_rpc_timeout)?;
        config.shutdown_grace = env_secs("KEEL_SHUTDOWN_GRACE", config.shutdown_grace)?;

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.max_heartbeat_age.is_zero() {
            anyhow::bail!("max_heartbeat_age must be greater than 0");
        }

        if self.sweep_interval.is_zero() {
            anyhow::bail!("sweep_interval must be greater than 0");
        }

        if self.agent_rpc_timeout.is_zero() {
            anyhow::bail!("agent_rpc_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("0.0.0.0:8080".to_string())
    }
}

fn env_secs(name: &str, default: Duration) -> anyhow::Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| anyhow::anyhow!("{} must be a whole number of seconds, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_heartbeat_age, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.agent_rpc_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.max_heartbeat_age = Duration::ZERO;
        assert!(config.validate().is_err());

        config.max_heartbeat_age = Duration::from_secs(30);
        config.sweep_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.sweep_interval = Duration::from_secs(1);
        config.bind_addr = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
