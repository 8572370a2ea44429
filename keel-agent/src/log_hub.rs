//! Local log hub
//!
//! Fans out log lines produced on this node (step containers and agent
//! lifecycle messages) to any number of live readers. Nothing is retained:
//! a reader only sees lines published after it subscribed, and a reader that
//! falls more than [`LOG_HUB_CAPACITY`] lines behind skips what it missed.

use futures_util::{Stream, StreamExt};
use keel_core::domain::log::{LogEntry, LogLevel, LogSource};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

pub const LOG_HUB_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct LogHub {
    tx: broadcast::Sender<LogEntry>,
}

impl LogHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOG_HUB_CAPACITY);
        Self { tx }
    }

    /// Publish a line; returns immediately whether or not anyone listens
    pub fn publish(&self, entry: LogEntry) {
        let _ = self.tx.send(entry);
    }

    /// Publish an agent lifecycle message for `node_id`
    pub fn node(&self, node_id: &str, level: LogLevel, content: impl Into<String>) {
        self.publish(LogEntry::new(LogSource::Node, node_id, level, content));
    }

    /// Every line published from now on
    pub fn stream(&self) -> impl Stream<Item = LogEntry> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(entry) => Some(entry),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!("Log reader lagged, skipped {} lines", skipped);
                    None
                }
            }
        })
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}
