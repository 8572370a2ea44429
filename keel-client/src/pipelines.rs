//! Pipeline-related controller endpoints

use crate::error::Result;
use crate::{ControllerClient, handle_response};
use keel_core::domain::pipeline::PipelineStatus;
use keel_core::dto::pipeline::{
    CancelPipelineRequest, CancelPipelineResponse, ExecutePipelineRequest,
    ExecutePipelineResponse,
};

impl ControllerClient {
    // =============================================================================
    // Pipeline Execution
    // =============================================================================

    /// Dispatch a pipeline to a node
    ///
    /// `accepted = true` only means the node started the pipeline; the
    /// outcome has to be read from its status or events.
    ///
    /// # Arguments
    /// * `node_id` - Target node
    /// * `req` - Pipeline definition plus env/arg overrides
    pub async fn execute_pipeline(
        &self,
        node_id: &str,
        req: &ExecutePipelineRequest,
    ) -> Result<ExecutePipelineResponse> {
        let url = format!("{}/api/nodes/{}/pipelines", self.base_url, node_id);
        let response = self.unary(self.client.post(&url)).json(req).send().await?;

        handle_response(response).await
    }

    /// Current status of an execution on a node
    pub async fn pipeline_status(&self, node_id: &str, execution_id: &str) -> Result<PipelineStatus> {
        let url = format!(
            "{}/api/nodes/{}/pipelines/{}",
            self.base_url, node_id, execution_id
        );
        let response = self.unary(self.client.get(&url)).send().await?;

        handle_response(response).await
    }

    /// Cancel an execution on a node
    pub async fn cancel_pipeline(
        &self,
        node_id: &str,
        execution_id: &str,
        reason: Option<String>,
    ) -> Result<CancelPipelineResponse> {
        let url = format!(
            "{}/api/nodes/{}/pipelines/{}/cancel",
            self.base_url, node_id, execution_id
        );
        let response = self
            .unary(self.client.post(&url))
            .json(&CancelPipelineRequest { reason })
            .send()
            .await?;

        handle_response(response).await
    }
}
