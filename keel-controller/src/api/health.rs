//! Health Check API Handler
//!
//! Reports the controller as healthy along with the number of connected nodes.

use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::fleet::FleetController;

/// GET /health
/// Health check endpoint
pub async fn health_check(State(fleet): State<Arc<FleetController>>) -> Json<Value> {
    let nodes = fleet.list_nodes().await.len();
    Json(json!({ "status": "ok", "nodes": nodes }))
}
