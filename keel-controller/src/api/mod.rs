//! API Module
//!
//! HTTP API layer for the controller.
//! Each submodule handles endpoints for a specific domain.

pub mod containers;
pub mod error;
pub mod events;
pub mod health;
pub mod nodes;
pub mod pipelines;
pub mod stream;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::fleet::FleetController;

/// Create the main API router with all endpoints
pub fn create_router(fleet: Arc<FleetController>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Agent endpoints
        .route("/api/nodes/register", post(nodes::register_node))
        .route("/api/nodes/{id}/heartbeat", post(nodes::node_heartbeat))
        .route(
            "/api/nodes/{id}/events",
            post(nodes::forward_events).get(events::stream_events),
        )
        // Node endpoints
        .route("/api/nodes", get(nodes::list_nodes))
        .route("/api/nodes/{id}", get(nodes::get_node))
        .route("/api/nodes/{id}/metrics", get(nodes::get_node_metrics))
        .route("/api/nodes/{id}/events/sse", get(events::stream_events_sse))
        .route("/api/nodes/{id}/logs", get(containers::stream_node_logs))
        // Pipeline endpoints
        .route("/api/nodes/{id}/pipelines", post(pipelines::execute_pipeline))
        .route(
            "/api/nodes/{id}/pipelines/{exec}",
            get(pipelines::get_pipeline_status),
        )
        .route(
            "/api/nodes/{id}/pipelines/{exec}/cancel",
            post(pipelines::cancel_pipeline),
        )
        // Container endpoints
        .route(
            "/api/nodes/{id}/containers/{cid}/logs",
            get(containers::stream_container_logs),
        )
        .route(
            "/api/nodes/{id}/containers/{cid}/{action}",
            post(containers::container_action),
        )
        // Add state and middleware
        .with_state(fleet)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::directory::InMemoryDirectory;
    use crate::testing::{FakeGateway, pipeline, register_request};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use keel_core::domain::event::{Event, status as code};
    use keel_core::dto::pipeline::ExecutePipelineRequest;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn fleet(gateway: Arc<FakeGateway>) -> Arc<FleetController> {
        Arc::new(FleetController::new(
            Config::default(),
            Arc::new(InMemoryDirectory::new()),
            gateway,
        ))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn register(app: &Router, node_id: &str) -> String {
        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/nodes/register",
            Some(serde_json::to_value(register_request(node_id)).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_counts_nodes() {
        let app = create_router(fleet(Arc::new(FakeGateway::default())));
        register(&app, "n1").await;

        let (status, body) = send(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"], 1);
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let app = create_router(fleet(Arc::new(FakeGateway::default())));
        let session = register(&app, "n1").await;
        assert!(session.starts_with("n1-"));

        let (status, body) = send(app.clone(), "GET", "/api/nodes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["node_id"], "n1");

        let (status, body) = send(app, "GET", "/api/nodes/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "node not registered: ghost");
    }

    #[tokio::test]
    async fn test_register_empty_id_is_not_an_http_error() {
        let app = create_router(fleet(Arc::new(FakeGateway::default())));

        let (status, body) = send(
            app,
            "POST",
            "/api/nodes/register",
            Some(serde_json::to_value(register_request("")).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_heartbeat() {
        let app = create_router(fleet(Arc::new(FakeGateway::default())));
        let session = register(&app, "n1").await;

        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/nodes/n1/heartbeat",
            Some(json!({ "node_id": "n1", "session_id": session })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/nodes/ghost/heartbeat",
            Some(json!({ "node_id": "ghost", "session_id": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            app,
            "POST",
            "/api/nodes/n1/heartbeat",
            Some(json!({ "node_id": "n2", "session_id": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execute_on_unregistered_node() {
        let gateway = Arc::new(FakeGateway::default());
        let app = create_router(fleet(gateway.clone()));

        let request = ExecutePipelineRequest {
            node_id: String::new(),
            pipeline_id: String::new(),
            pipeline: pipeline("p1", 1),
            envs: HashMap::new(),
            args: HashMap::new(),
        };
        let (status, body) = send(
            app,
            "POST",
            "/api/nodes/ghost/pipelines",
            Some(serde_json::to_value(request).unwrap()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], false);
        assert_eq!(body["message"], "node not registered: ghost");
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_round_trip_through_agent() {
        let gateway = Arc::new(FakeGateway::default());
        let app = create_router(fleet(gateway.clone()));
        register(&app, "n1").await;

        let request = ExecutePipelineRequest {
            node_id: String::new(),
            pipeline_id: String::new(),
            pipeline: pipeline("p1", 3),
            envs: HashMap::new(),
            args: HashMap::new(),
        };
        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/nodes/n1/pipelines",
            Some(serde_json::to_value(request).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], true);

        let (status, body) = send(app.clone(), "GET", "/api/nodes/n1/pipelines/p1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_steps"], 3);

        // The agent's 404 is passed through
        let (status, body) = send(app.clone(), "GET", "/api/nodes/n1/pipelines/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "execution nope not found");

        let (status, body) = send(
            app,
            "POST",
            "/api/nodes/n1/pipelines/p1/cancel",
            Some(json!({ "reason": "operator" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(gateway.calls().contains(&"cancel http://n1:7070 p1 operator".to_string()));
    }

    #[tokio::test]
    async fn test_container_action_routes() {
        let gateway = Arc::new(FakeGateway::default());
        let app = create_router(fleet(gateway.clone()));
        register(&app, "n1").await;

        let (status, _) = send(app.clone(), "POST", "/api/nodes/n1/containers/c1/restart", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(app.clone(), "POST", "/api/nodes/n1/containers/c1/explode", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        gateway.set_unreachable(true);
        let (status, _) = send(app, "POST", "/api/nodes/n1/containers/c1/stop", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_relayed_events_reach_ndjson_subscribers() {
        let fleet = fleet(Arc::new(FakeGateway::default()));
        let app = create_router(fleet.clone());
        register(&app, "n1").await;

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/nodes/n1/events?types=pipeline")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            stream::NDJSON_CONTENT_TYPE
        );

        let batch = json!({
            "events": [
                Event::node("n1", code::REGISTERED, ""),
                Event::pipeline("n1", "p1", code::STARTED, ""),
            ]
        });
        let (status, _) = send(app, "POST", "/api/nodes/n1/events", Some(batch)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let line = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        let event: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(event["type"], "pipeline");
        assert_eq!(event["entity_id"], "p1");
    }

    #[tokio::test]
    async fn test_event_stream_validation() {
        let app = create_router(fleet(Arc::new(FakeGateway::default())));
        register(&app, "n1").await;

        let (status, _) = send(app.clone(), "GET", "/api/nodes/n1/events?types=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app, "GET", "/api/nodes/ghost/events/sse", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sse_content_type() {
        let app = create_router(fleet(Arc::new(FakeGateway::default())));
        register(&app, "n1").await;

        let response = app
            .oneshot(
                Request::get("/api/nodes/n1/events/sse")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    }

    #[tokio::test]
    async fn test_container_logs_are_relayed() {
        let app = create_router(fleet(Arc::new(FakeGateway::default())));
        register(&app, "n1").await;

        let response = app
            .oneshot(
                Request::get("/api/nodes/n1/containers/c1/logs?tail=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["source_id"], "c1");
    }
}
