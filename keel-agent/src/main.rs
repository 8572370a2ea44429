//! Keel Agent binary
//!
//! Loads configuration, checks the container engine, registers with the
//! controller and serves the agent API until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keel_agent::agent::NodeAgent;
use keel_agent::api;
use keel_agent::config::Config;
use keel_agent::container::{CliEngine, ContainerRuntimeClient};
use keel_agent::metrics::{ProcMetricsSource, collect_node_info};
use keel_client::ControllerClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_agent=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keel Agent");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: node_id={}, controller_url={}",
        config.node_id, config.controller_url
    );

    // Container engine
    let engine = CliEngine::new(config.container_engine.clone());
    engine
        .check_available()
        .await
        .with_context(|| format!("Container engine '{}' is not usable", engine.binary()))?;
    let engine = Arc::new(engine);
    let runtime = Arc::new(ContainerRuntimeClient::new(engine.clone()));

    // Controller link
    let client = ControllerClient::new(config.controller_url.clone())
        .with_rpc_timeout(config.rpc_timeout);

    let hostname = keel_agent::config::default_node_id();
    let node_info = collect_node_info(&hostname, config.labels.clone()).await;
    let metrics = Arc::new(ProcMetricsSource::new(engine));

    let bind_addr = config.bind_addr.clone();
    let shutdown_grace = config.shutdown_grace;
    let agent = Arc::new(NodeAgent::new(
        config,
        Arc::new(client),
        runtime,
        metrics,
        node_info,
    ));

    agent
        .start()
        .await
        .context("Failed to register with controller")?;

    // Serve the agent API
    let app = api::create_router(agent.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!("Agent API listening on {}", bind_addr);

    api::serve(listener, app, shutdown_signal(), agent.stop(), shutdown_grace).await?;

    info!("Keel Agent stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
