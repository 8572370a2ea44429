//! Keel Controller binary
//!
//! Loads configuration, starts the eviction sweep and serves the controller
//! API until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keel_controller::api;
use keel_controller::config::Config;
use keel_controller::directory::InMemoryDirectory;
use keel_controller::fleet::FleetController;
use keel_controller::gateway::HttpAgentGateway;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keel Controller...");

    let config = load_config()?;
    info!(
        "Loaded configuration: max_heartbeat_age={:?}, sweep_interval={:?}",
        config.max_heartbeat_age, config.sweep_interval
    );

    let gateway = Arc::new(HttpAgentGateway::new(config.agent_rpc_timeout));
    let directory = Arc::new(InMemoryDirectory::new());
    let fleet = Arc::new(FleetController::new(config.clone(), directory, gateway));

    // Eviction sweep
    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(fleet.clone().run_sweeper(cancel.clone()));

    // Build router with all API endpoints
    let app = api::create_router(fleet);

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    // Open event streams never finish on their own, so the server gets the
    // grace period and is then dropped
    let shutdown = CancellationToken::new();
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });
    let server = tokio::spawn(async move { server.await });

    shutdown_signal().await;
    shutdown.cancel();
    cancel.cancel();

    match tokio::time::timeout(config.shutdown_grace, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(e).context("Server error"),
        Ok(Err(e)) => return Err(e).context("Server task failed"),
        Err(_) => warn!(
            "Connections still open after {:?}, shutting down anyway",
            config.shutdown_grace
        ),
    }

    if tokio::time::timeout(config.shutdown_grace, sweeper).await.is_err() {
        warn!("Sweeper did not stop within {:?}", config.shutdown_grace);
    }

    info!("Keel Controller stopped");
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
