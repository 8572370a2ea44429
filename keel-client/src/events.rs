//! Event subscription endpoint

use crate::error::Result;
use crate::stream::{self, JsonStream};
use crate::{ControllerClient, check_status};
use keel_core::domain::event::{Event, EventType};

impl ControllerClient {
    /// Subscribe to the events a node forwards
    ///
    /// # Arguments
    /// * `node_id` - Node whose events to receive
    /// * `types` - Event types of interest; empty means all
    ///
    /// # Returns
    /// A stream that ends when the node is evicted or the stream is dropped
    pub async fn subscribe_events(
        &self,
        node_id: &str,
        types: &[EventType],
    ) -> Result<JsonStream<Event>> {
        let url = format!("{}/api/nodes/{}/events", self.base_url, node_id);
        let response = self
            .client
            .get(&url)
            .query(&[("types", join_types(types))])
            .send()
            .await?;

        Ok(stream::from_response(check_status(response).await?))
    }
}

pub(crate) fn join_types(types: &[EventType]) -> String {
    types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
