//! Keel CLI
//!
//! Command-line interface for operating a Keel fleet through its controller.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel container pipeline fleet CLI", long_about = None)]
struct Cli {
    /// Controller URL
    #[arg(
        long,
        env = "KEEL_CONTROLLER_URL",
        default_value = "http://localhost:8080"
    )]
    controller_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        controller_url: cli.controller_url,
    };

    handle_command(cli.command, &config).await
}
