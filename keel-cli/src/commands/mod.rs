//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod container;
mod events;
mod logs;
mod nodes;
mod pipeline;

pub use container::ContainerCommands;
pub use nodes::NodeCommands;
pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Node queries
    Nodes {
        #[command(subcommand)]
        command: NodeCommands,
    },
    /// Pipeline dispatch and tracking
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Container control on a node
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },
    /// Stream logs from a node or one of its containers
    Logs {
        /// Node ID
        node: String,

        /// Stream this container's output instead of the node log
        #[arg(short, long)]
        container: Option<String>,

        /// Number of trailing lines to show first (containers only)
        #[arg(short, long)]
        tail: Option<u32>,

        /// Keep streaming new output (containers only)
        #[arg(short, long)]
        follow: bool,
    },
    /// Stream events a node reports
    Events {
        /// Node ID
        node: String,

        /// Event types to show (node, pipeline, container); all when omitted
        #[arg(short = 't', long = "type")]
        types: Vec<String>,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
///
/// # Returns
/// Result indicating success or failure
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Nodes { command } => nodes::handle_node_command(command, config).await,
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Container { command } => {
            container::handle_container_command(command, config).await
        }
        Commands::Logs {
            node,
            container,
            tail,
            follow,
        } => logs::stream_logs(config, &node, container, tail, follow).await,
        Commands::Events { node, types } => events::stream_events(config, &node, &types).await,
    }
}
