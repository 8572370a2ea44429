//! Node command handlers
//!
//! Handles listing nodes, showing one node, and its latest metrics.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use keel_client::ControllerClient;

use crate::config::Config;
use crate::output::{print_metrics, print_node_details, print_node_summary};

/// Node subcommands
#[derive(Subcommand)]
pub enum NodeCommands {
    /// List all connected nodes
    List,
    /// Get node details
    Get {
        /// Node ID
        id: String,
    },
    /// Show the node's latest metrics
    Metrics {
        /// Node ID
        id: String,
    },
}

/// Handle node commands
///
/// # Arguments
/// * `command` - The node command to execute
/// * `config` - The CLI configuration
pub async fn handle_node_command(command: NodeCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        NodeCommands::List => list_nodes(&client).await,
        NodeCommands::Get { id } => get_node(&client, &id).await,
        NodeCommands::Metrics { id } => node_metrics(&client, &id).await,
    }
}

/// List all connected nodes
async fn list_nodes(client: &ControllerClient) -> Result<()> {
    let nodes = client.list_nodes().await?;

    if nodes.is_empty() {
        println!("{}", "No nodes connected.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} connected node(s):", nodes.len()).bold()
        );
        println!();
        for node in nodes {
            print_node_summary(&node);
        }
    }

    Ok(())
}

async fn get_node(client: &ControllerClient, id: &str) -> Result<()> {
    let node = client.get_node(id).await?;
    print_node_details(&node);
    Ok(())
}

async fn node_metrics(client: &ControllerClient, id: &str) -> Result<()> {
    let resp = client.node_metrics(id).await?;

    match resp.metrics {
        Some(metrics) => print_metrics(&metrics),
        None => println!(
            "{}",
            format!("Node {} has not reported metrics yet.", id).yellow()
        ),
    }

    Ok(())
}
