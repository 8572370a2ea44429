//! Event DTOs
//!
//! Data transfer objects for relaying and subscribing to events.

use serde::{Deserialize, Serialize};

use crate::domain::event::Event;

/// Events relayed from an agent to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<Event>,
}

/// Query parameters for event subscriptions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery {
    /// Comma separated event types; empty means all
    #[serde(default)]
    pub types: Option<String>,
}
