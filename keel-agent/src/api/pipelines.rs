//! Pipeline API Handlers
//!
//! Execution, status and cancellation of pipelines on this node.

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

use crate::agent::{AgentError, NodeAgent};
use crate::api::error::ApiResult;
use crate::executor::ExecutorError;

/// POST /api/pipelines
/// Start executing a pipeline
///
/// A pipeline rejected before starting is answered with `accepted = false`;
/// failures after starting are only visible through status and events.
pub async fn execute_pipeline(
    State(agent): State<Arc<NodeAgent>>,
    Json(req): Json<ExecutePipelineRequest>,
) -> Json<ExecutePipelineResponse> {
    if !req.node_id.is_empty() && req.node_id != agent.node_id() {
        return Json(ExecutePipelineResponse {
            execution_id: String::new(),
            accepted: false,
            message: format!("pipeline addressed to node {}", req.node_id),
        });
    }

    let pipeline = req.into_pipeline();
    tracing::info!("Executing pipeline: {} ({})", pipeline.id, pipeline.name);

    match agent.execute_pipeline(pipeline).await {
        Ok(execution_id) => Json(ExecutePipelineResponse {
            execution_id,
            accepted: true,
            message: "pipeline accepted".to_string(),
        }),
        Err(e) => {
            tracing::warn!("Rejected pipeline: {}", e);
            Json(ExecutePipelineResponse {
                execution_id: String::new(),
                accepted: false,
                message: e.to_string(),
            })
        }
    }
}

/// GET /api/pipelines/{id}
pub async fn get_pipeline_status(
    State(agent): State<Arc<NodeAgent>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PipelineStatus>> {
    tracing::debug!("Getting pipeline status: {}", id);

    let status = agent.pipeline_status(&id).await?;
    Ok(Json(status))
}

/// POST /api/pipelines/{id}/cancel
pub async fn cancel_pipeline(
    State(agent): State<Arc<NodeAgent>>,
    Path(id): Path<String>,
    Json(req): Json<CancelPipelineRequest>,
) -> ApiResult<Json<CancelPipelineResponse>> {
    let reason = req.reason.unwrap_or_else(|| "canceled by request".to_string());
    tracing::info!("Canceling pipeline {}: {}", id, reason);

    match agent.cancel_pipeline(&id, &reason).await {
        Ok(_) => Ok(Json(CancelPipelineResponse {
            success: true,
            message: format!("pipeline {} canceled", id),
        })),
        Err(AgentError::Executor(e @ ExecutorError::NotRunning { .. })) => {
            Ok(Json(CancelPipelineResponse {
                success: false,
                message: e.to_string(),
            }))
        }
        Err(e) => Err(e.into()),
    }
}
