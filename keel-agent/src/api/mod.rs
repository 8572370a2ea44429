//! API Module
//!
//! HTTP API the controller uses to reach this node's agent.
//! Each submodule handles endpoints for a specific domain.

pub mod containers;
pub mod error;
pub mod health;
pub mod node;
pub mod pipelines;
pub mod stream;

use axum::{
    Router,
    routing::{get, post},
};
use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::agent::NodeAgent;

/// Create the agent router with all endpoints
pub fn create_router(agent: Arc<NodeAgent>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/api/pipelines", post(pipelines::execute_pipeline))
        .route("/api/pipelines/{id}", get(pipelines::get_pipeline_status))
        .route("/api/pipelines/{id}/cancel", post(pipelines::cancel_pipeline))
        // Container endpoints
        .route(
            "/api/containers/{id}/logs",
            get(containers::container_logs),
        )
        .route(
            "/api/containers/{id}/{action}",
            post(containers::container_action),
        )
        // Node endpoints
        .route("/api/metrics", get(node::get_metrics))
        .route("/api/logs", get(node::stream_logs))
        .route("/api/events", get(node::stream_events))
        // Add state and middleware
        .with_state(agent)
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` until `signal` resolves
///
/// `on_signal` runs right after the signal while connections are still
/// open. Followed logs and event streams only end once the agent stops, so
/// open connections then get `grace` to finish before they are dropped.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    signal: impl Future<Output = ()>,
    on_signal: impl Future<Output = ()>,
    grace: Duration,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });
    let mut server = tokio::spawn(async move { server.await });

    signal.await;
    shutdown.cancel();
    on_signal.await;

    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(e).context("Server error"),
        Ok(Err(e)) => return Err(e).context("Server task failed"),
        Err(_) => {
            warn!(
                "Connections still open after {:?}, shutting down anyway",
                grace
            );
            server.abort();
        }
    }
    Ok(())
}
