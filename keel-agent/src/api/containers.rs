//! Container API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use keel_core::dto::container::{ContainerAction, ContainerActionResponse, LogQuery};
use std::sync::Arc;

use crate::agent::NodeAgent;
use crate::api::error::{ApiError, ApiResult};
use crate::api::stream::ndjson;

/// POST /api/containers/{id}/{action}
/// Start, stop or restart a container
pub async fn container_action(
    State(agent): State<Arc<NodeAgent>>,
    Path((id, action)): Path<(String, String)>,
) -> ApiResult<Json<ContainerActionResponse>> {
    let action: ContainerAction = action.parse().map_err(ApiError::BadRequest)?;
    tracing::info!("Container {}: {}", id, action.as_str());

    agent.container_action(&id, action).await?;

    Ok(Json(ContainerActionResponse {
        success: true,
        message: format!("container {} {}", id, action.as_str()),
    }))
}

/// GET /api/containers/{id}/logs?follow=&tail=
/// Stream a container's output as NDJSON log entries
pub async fn container_logs(
    State(agent): State<Arc<NodeAgent>>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Response> {
    tracing::debug!("Streaming logs of container {}", id);

    let entries = agent
        .stream_container_logs(&id, query.follow, query.tail)
        .await?;
    Ok(ndjson(entries))
}
