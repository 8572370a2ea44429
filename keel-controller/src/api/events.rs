//! Event Subscription Handlers

use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use keel_core::domain::event::EventType;
use keel_core::dto::event::EventQuery;
use keel_core::event_bus::Subscription;
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::stream::{ndjson, sse};
use crate::fleet::FleetController;

async fn subscribe(
    fleet: &FleetController,
    node_id: &str,
    query: &EventQuery,
) -> ApiResult<Subscription> {
    let types = EventType::parse_list(query.types.as_deref().unwrap_or(""))
        .map_err(ApiError::BadRequest)?;
    Ok(fleet.subscribe_events(node_id, &types).await?)
}

/// GET /api/nodes/{id}/events?types=pipeline,container
/// Stream a node's events as NDJSON until the client disconnects
pub async fn stream_events(
    State(fleet): State<Arc<FleetController>>,
    Path(id): Path<String>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Response> {
    let subscription = subscribe(&fleet, &id, &query).await?;
    Ok(ndjson(subscription.into_stream()))
}

/// GET /api/nodes/{id}/events/sse?types=..
/// Same stream as Server-Sent Events
pub async fn stream_events_sse(
    State(fleet): State<Arc<FleetController>>,
    Path(id): Path<String>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Response> {
    let subscription = subscribe(&fleet, &id, &query).await?;
    Ok(sse(subscription.into_stream()))
}
