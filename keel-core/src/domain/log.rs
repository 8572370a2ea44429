//! Log domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A log line produced on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub source: LogSource,
    /// Node id, container id or pipeline id depending on `source`
    pub source_id: String,
    pub level: LogLevel,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        source: LogSource,
        source_id: impl Into<String>,
        level: LogLevel,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            level,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Node,
    Pipeline,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}
