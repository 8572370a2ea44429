//! Container command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use keel_core::dto::container::ContainerAction;

use crate::config::Config;

/// Container subcommands
#[derive(Subcommand)]
pub enum ContainerCommands {
    /// Start a stopped container
    Start {
        /// Node ID
        node: String,
        /// Container ID
        id: String,
    },
    /// Stop a running container
    Stop {
        /// Node ID
        node: String,
        /// Container ID
        id: String,
    },
    /// Restart a container
    Restart {
        /// Node ID
        node: String,
        /// Container ID
        id: String,
    },
}

/// Handle container commands
///
/// # Arguments
/// * `command` - The container command to execute
/// * `config` - The CLI configuration
pub async fn handle_container_command(command: ContainerCommands, config: &Config) -> Result<()> {
    let (node, id, action) = match command {
        ContainerCommands::Start { node, id } => (node, id, ContainerAction::Start),
        ContainerCommands::Stop { node, id } => (node, id, ContainerAction::Stop),
        ContainerCommands::Restart { node, id } => (node, id, ContainerAction::Restart),
    };

    let resp = config
        .client()
        .container_action(&node, &id, action)
        .await?;

    if resp.success {
        println!("{} {}", "✓".green(), resp.message);
    } else {
        println!("{} {}", "✗".red(), resp.message);
    }

    Ok(())
}
