//! Container & Log API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use keel_core::dto::container::{ContainerAction, ContainerActionResponse, LogQuery};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::stream::ndjson;
use crate::fleet::FleetController;

/// POST /api/nodes/{id}/containers/{cid}/{action}
/// Start, stop or restart a container on the node
pub async fn container_action(
    State(fleet): State<Arc<FleetController>>,
    Path((id, cid, action)): Path<(String, String, String)>,
) -> ApiResult<Json<ContainerActionResponse>> {
    let action: ContainerAction = action.parse().map_err(ApiError::BadRequest)?;

    let resp = match action {
        ContainerAction::Start => fleet.start_container(&id, &cid).await?,
        ContainerAction::Stop => fleet.stop_container(&id, &cid).await?,
        ContainerAction::Restart => fleet.restart_container(&id, &cid).await?,
    };
    Ok(Json(resp))
}

/// GET /api/nodes/{id}/logs
/// Relay the node's log stream as NDJSON
pub async fn stream_node_logs(
    State(fleet): State<Arc<FleetController>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    tracing::debug!("Opening log stream of node {}", id);
    Ok(ndjson(fleet.stream_node_logs(&id).await?))
}

/// GET /api/nodes/{id}/containers/{cid}/logs?follow=&tail=
/// Relay a container's output as NDJSON
pub async fn stream_container_logs(
    State(fleet): State<Arc<FleetController>>,
    Path((id, cid)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Response> {
    tracing::debug!("Opening log stream of container {} on node {}", cid, id);
    Ok(ndjson(
        fleet.stream_container_logs(&id, &cid, &query).await?,
    ))
}
