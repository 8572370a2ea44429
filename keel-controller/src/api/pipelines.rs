//! Pipeline API Handlers
//!
//! Dispatch, status and cancellation of pipelines on a node. The controller
//! keeps no pipeline state of its own; every request is answered by the
//! node's agent.

use axum::{
    Json,
    extract::{Path, State},
};
use keel_core::domain::pipeline::PipelineStatus;
use keel_core::dto::pipeline::{
    CancelPipelineRequest, CancelPipelineResponse, ExecutePipelineRequest,
    ExecutePipelineResponse,
};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::fleet::FleetController;

/// POST /api/nodes/{id}/pipelines
/// Execute a pipeline on the node
pub async fn execute_pipeline(
    State(fleet): State<Arc<FleetController>>,
    Path(id): Path<String>,
    Json(mut req): Json<ExecutePipelineRequest>,
) -> ApiResult<Json<ExecutePipelineResponse>> {
    if !req.node_id.is_empty() && req.node_id != id {
        return Ok(Json(ExecutePipelineResponse {
            execution_id: String::new(),
            accepted: false,
            message: format!("request targets node {}, not {}", req.node_id, id),
        }));
    }
    req.node_id = id;

    Ok(Json(fleet.execute_pipeline(req).await?))
}

/// GET /api/nodes/{id}/pipelines/{exec}
/// Status of an execution on the node
pub async fn get_pipeline_status(
    State(fleet): State<Arc<FleetController>>,
    Path((id, exec)): Path<(String, String)>,
) -> ApiResult<Json<PipelineStatus>> {
    Ok(Json(fleet.get_pipeline_status(&id, &exec).await?))
}

/// POST /api/nodes/{id}/pipelines/{exec}/cancel
/// Forward a cancel request to the node's agent
pub async fn cancel_pipeline(
    State(fleet): State<Arc<FleetController>>,
    Path((id, exec)): Path<(String, String)>,
    Json(req): Json<CancelPipelineRequest>,
) -> ApiResult<Json<CancelPipelineResponse>> {
    Ok(Json(fleet.cancel_pipeline(&id, &exec, req.reason).await?))
}
