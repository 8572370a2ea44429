//! Node API Handlers
//!
//! Metrics, the node log stream and event subscriptions.

use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use keel_core::domain::event::EventType;
use keel_core::dto::event::EventQuery;
use keel_core::dto::node::NodeMetricsResponse;
use std::sync::Arc;

use crate::agent::NodeAgent;
use crate::api::error::{ApiError, ApiResult};
use crate::api::stream::ndjson;

/// GET /api/metrics
/// Latest metrics sample; `metrics` is null until the first one
pub async fn get_metrics(State(agent): State<Arc<NodeAgent>>) -> Json<NodeMetricsResponse> {
    Json(NodeMetricsResponse {
        node_id: agent.node_id().to_string(),
        metrics: agent.node_metrics().await,
    })
}

/// GET /api/logs
/// Stream log lines produced on this node from now on
pub async fn stream_logs(State(agent): State<Arc<NodeAgent>>) -> Response {
    tracing::debug!("Opening node log stream");
    ndjson(agent.stream_node_logs())
}

/// GET /api/events?types=pipeline,container
/// Stream events of the requested types; all types when none are given
pub async fn stream_events(
    State(agent): State<Arc<NodeAgent>>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Response> {
    let types = EventType::parse_list(query.types.as_deref().unwrap_or(""))
        .map_err(ApiError::BadRequest)?;
    tracing::debug!("Opening event stream for {:?}", types);

    let subscription = agent.subscribe_events(&types);
    Ok(ndjson(subscription.into_stream()))
}
