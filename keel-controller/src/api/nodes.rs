//! Node API Handlers
//!
//! Registration, heartbeats and event relay used by agents, plus the node
//! queries used by operators.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use keel_core::dto::event::EventBatch;
use keel_core::dto::node::{
    HeartbeatRequest, HeartbeatResponse, NodeMetricsResponse, NodeSummary, RegisterRequest,
    RegisterResponse,
};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::fleet::FleetController;

// =============================================================================
// Agent Endpoints
// =============================================================================

/// POST /api/nodes/register
/// Register a node; an empty node id is refused with `success=false`
pub async fn register_node(
    State(fleet): State<Arc<FleetController>>,
    Json(req): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    tracing::info!("Registering node: {}", req.node_id);
    Json(fleet.register(req).await)
}

/// POST /api/nodes/{id}/heartbeat
/// Keep a node connected and cache its metrics
pub async fn node_heartbeat(
    State(fleet): State<Arc<FleetController>>,
    Path(id): Path<String>,
    Json(mut req): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    if req.node_id.is_empty() {
        req.node_id = id;
    } else if req.node_id != id {
        return Err(ApiError::BadRequest(format!(
            "heartbeat for node {} sent to node {}",
            req.node_id, id
        )));
    }

    Ok(Json(fleet.heartbeat(req).await))
}

/// POST /api/nodes/{id}/events
/// Accept a batch of events relayed by a node's agent
pub async fn forward_events(
    State(fleet): State<Arc<FleetController>>,
    Path(id): Path<String>,
    Json(batch): Json<EventBatch>,
) -> ApiResult<StatusCode> {
    fleet.forward_events(&id, batch.events).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Node Query Endpoints
// =============================================================================

/// GET /api/nodes
/// List all connected nodes
pub async fn list_nodes(State(fleet): State<Arc<FleetController>>) -> Json<Vec<NodeSummary>> {
    tracing::debug!("Listing all nodes");
    Json(fleet.list_nodes().await)
}

/// GET /api/nodes/{id}
/// Get a specific node
pub async fn get_node(
    State(fleet): State<Arc<FleetController>>,
    Path(id): Path<String>,
) -> ApiResult<Json<NodeSummary>> {
    Ok(Json(fleet.get_node(&id).await?))
}

/// GET /api/nodes/{id}/metrics
/// Metrics from the node's latest heartbeat
pub async fn get_node_metrics(
    State(fleet): State<Arc<FleetController>>,
    Path(id): Path<String>,
) -> ApiResult<Json<NodeMetricsResponse>> {
    Ok(Json(fleet.get_node_metrics(&id).await?))
}
