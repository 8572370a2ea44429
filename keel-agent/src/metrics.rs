//! Node metrics sampling
//!
//! Collects coarse resource usage from procfs and static node information
//! reported at registration. Disk usage is not sampled and is reported as 0.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use keel_core::domain::node::{HardwareSummary, NodeInfo, NodeMetrics};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::container::ContainerEngine;

/// Source of point-in-time node metrics
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn collect(&self) -> Result<NodeMetrics>;
}

/// Metrics read from `/proc`, with the container count from the engine
pub struct ProcMetricsSource {
    proc_root: PathBuf,
    engine: Arc<dyn ContainerEngine>,
}

impl ProcMetricsSource {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            engine,
        }
    }

    async fn read(&self, name: &str) -> Result<String> {
        let path = self.proc_root.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

#[async_trait]
impl MetricsSource for ProcMetricsSource {
    async fn collect(&self) -> Result<NodeMetrics> {
        let load_average = parse_loadavg(&self.read("loadavg").await?)?;
        let memory_usage = parse_meminfo(&self.read("meminfo").await?)?;
        let cores = cpu_cores();

        let container_count = match self.engine.running_count().await {
            Ok(count) => count,
            Err(e) => {
                debug!("Could not count containers: {}", e);
                0
            }
        };

        Ok(NodeMetrics {
            cpu_usage: cpu_usage(load_average, cores),
            memory_usage,
            disk_usage: 0.0,
            load_average,
            container_count,
            collected_at: Utc::now(),
        })
    }
}

/// One-minute load average
fn parse_loadavg(raw: &str) -> Result<f32> {
    raw.split_whitespace()
        .next()
        .and_then(|v| v.parse::<f32>().ok())
        .context("malformed loadavg")
}

/// Memory in use as a percentage, from MemTotal and MemAvailable
fn parse_meminfo(raw: &str) -> Result<f32> {
    let fields = meminfo_fields(raw);
    let total = *fields.get("MemTotal").context("MemTotal missing")?;
    let available = fields
        .get("MemAvailable")
        .or_else(|| fields.get("MemFree"))
        .copied()
        .context("MemAvailable missing")?;

    if total == 0 {
        return Ok(0.0);
    }
    Ok((total.saturating_sub(available) as f64 / total as f64 * 100.0) as f32)
}

/// meminfo values in kB, keyed by field name
fn meminfo_fields(raw: &str) -> HashMap<&str, u64> {
    raw.lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim(), value))
        })
        .collect()
}

/// Load relative to core count, as a percentage clamped to 0-100
fn cpu_usage(load_average: f32, cores: u32) -> f32 {
    (load_average / cores.max(1) as f32 * 100.0).clamp(0.0, 100.0)
}

fn cpu_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

fn cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string())
}

/// Static description of this node, sent at registration
///
/// Fields that cannot be read are left empty rather than failing.
pub async fn collect_node_info(hostname: &str, labels: HashMap<String, String>) -> NodeInfo {
    let kernel = tokio::fs::read_to_string("/proc/sys/kernel/osrelease")
        .await
        .ok()
        .map(|s| s.trim().to_string());
    let cpu_model = tokio::fs::read_to_string("/proc/cpuinfo")
        .await
        .ok()
        .and_then(|s| cpu_model(&s));
    let memory_total_bytes = tokio::fs::read_to_string("/proc/meminfo")
        .await
        .ok()
        .and_then(|s| meminfo_fields(&s).get("MemTotal").copied())
        .map(|kb| kb * 1024)
        .unwrap_or(0);

    NodeInfo {
        hostname: hostname.to_string(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        kernel,
        hardware: HardwareSummary {
            cpu_model,
            cpu_cores: cpu_cores(),
            memory_total_bytes,
            disk_total_bytes: 0,
            gpus: Vec::new(),
        },
        labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB\n\
                           MemFree:         2000000 kB\n\
                           MemAvailable:    4000000 kB\n\
                           Buffers:          100000 kB\n";

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(parse_loadavg("1.50 0.80 0.40 2/512 12345\n").unwrap(), 1.5);
        assert!(parse_loadavg("").is_err());
    }

    #[test]
    fn test_parse_meminfo_uses_available() {
        let usage = parse_meminfo(MEMINFO).unwrap();
        assert!((usage - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_meminfo_missing_total() {
        assert!(parse_meminfo("MemFree: 10 kB\n").is_err());
    }

    #[test]
    fn test_cpu_usage_is_clamped() {
        assert_eq!(cpu_usage(2.0, 4), 50.0);
        assert_eq!(cpu_usage(16.0, 4), 100.0);
        assert_eq!(cpu_usage(1.0, 0), 100.0);
    }

    #[test]
    fn test_cpu_model() {
        let info = "processor\t: 0\nmodel name\t: Example CPU @ 3.0GHz\n";
        assert_eq!(cpu_model(info).as_deref(), Some("Example CPU @ 3.0GHz"));
        assert_eq!(cpu_model("processor: 0\n"), None);
    }
}
