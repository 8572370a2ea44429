//! Pipeline command handlers
//!
//! Handles dispatching a pipeline file to a node, querying an execution
//! and canceling it.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use keel_client::ControllerClient;
use keel_core::domain::pipeline::{Pipeline, PipelineState, PipelineStatus};
use keel_core::dto::pipeline::ExecutePipelineRequest;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::output::{colorize_pipeline_state, print_pipeline_status};

/// How often `--watch` polls the execution
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Execute a pipeline file on a node
    Run {
        /// Node ID
        node: String,

        /// Path to the pipeline YAML file
        file: String,

        /// Execution id to use instead of the id in the file
        #[arg(long)]
        id: Option<String>,

        /// Environment for every step as KEY=value (repeatable)
        #[arg(short, long, value_parser = parse_key_val)]
        env: Vec<(String, String)>,

        /// Pipeline arguments as KEY=value (repeatable)
        #[arg(short, long, value_parser = parse_key_val)]
        arg: Vec<(String, String)>,

        /// Follow the execution until it finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Get the status of an execution
    Status {
        /// Node ID
        node: String,
        /// Execution ID
        id: String,
    },
    /// Cancel a running execution
    Cancel {
        /// Node ID
        node: String,
        /// Execution ID
        id: String,

        /// Reason recorded on the canceled step
        #[arg(short, long)]
        reason: Option<String>,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Handle pipeline commands
///
/// Routes pipeline subcommands to their respective handlers.
///
/// # Arguments
/// * `command` - The pipeline command to execute
/// * `config` - The CLI configuration
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::Run {
            node,
            file,
            id,
            env,
            arg,
            watch,
        } => run_pipeline(&client, &node, &file, id, env, arg, watch).await,
        PipelineCommands::Status { node, id } => {
            let status = client.pipeline_status(&node, &id).await?;
            print_pipeline_status(&status);
            Ok(())
        }
        PipelineCommands::Cancel { node, id, reason } => {
            cancel_pipeline(&client, &node, &id, reason).await
        }
    }
}

/// Read and check a pipeline definition
fn load_pipeline(path: &str) -> Result<Pipeline> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path))?;
    parse_pipeline(&content).with_context(|| format!("Invalid pipeline file: {}", path))
}

fn parse_pipeline(content: &str) -> Result<Pipeline> {
    let pipeline: Pipeline = serde_yaml::from_str(content).context("Failed to parse YAML")?;
    pipeline.validate()?;
    Ok(pipeline)
}

/// Dispatch a pipeline and optionally follow it
async fn run_pipeline(
    client: &ControllerClient,
    node: &str,
    file: &str,
    id: Option<String>,
    env: Vec<(String, String)>,
    arg: Vec<(String, String)>,
    watch: bool,
) -> Result<()> {
    let pipeline = load_pipeline(file)?;
    println!(
        "{}",
        format!(
            "Dispatching pipeline '{}' ({} step(s)) to node {}",
            pipeline.name,
            pipeline.steps.len(),
            node
        )
        .bold()
    );

    let req = ExecutePipelineRequest {
        node_id: node.to_string(),
        pipeline_id: id.unwrap_or_default(),
        pipeline,
        envs: env.into_iter().collect::<HashMap<_, _>>(),
        args: arg.into_iter().collect::<HashMap<_, _>>(),
    };

    let resp = client.execute_pipeline(node, &req).await?;
    if !resp.accepted {
        anyhow::bail!("Node {} refused the pipeline: {}", node, resp.message);
    }

    println!("{} Execution {}", "✓".green(), resp.execution_id.cyan());

    if watch {
        let status = watch_pipeline(client, node, &resp.execution_id).await?;
        println!();
        print_pipeline_status(&status);
        if status.state != PipelineState::Completed {
            anyhow::bail!("Pipeline finished as {}", status.state);
        }
    }

    Ok(())
}

/// Poll an execution until it reaches a terminal state
async fn watch_pipeline(
    client: &ControllerClient,
    node: &str,
    execution_id: &str,
) -> Result<PipelineStatus> {
    let mut ticker = tokio::time::interval(WATCH_INTERVAL);
    let mut last: Option<(PipelineState, usize)> = None;

    loop {
        ticker.tick().await;
        let status = client.pipeline_status(node, execution_id).await?;

        let position = (status.state, status.current_step_index);
        if last != Some(position) {
            let step = status
                .step(status.current_step_index)
                .map(|s| s.name.as_str())
                .unwrap_or("-");
            println!(
                "  {} step {}/{} {}",
                colorize_pipeline_state(status.state),
                (status.current_step_index + 1).min(status.total_steps),
                status.total_steps,
                step.dimmed()
            );
            last = Some(position);
        }

        if status.state.is_terminal() {
            return Ok(status);
        }
    }
}

async fn cancel_pipeline(
    client: &ControllerClient,
    node: &str,
    id: &str,
    reason: Option<String>,
) -> Result<()> {
    let resp = client.cancel_pipeline(node, id, reason).await?;

    if resp.success {
        println!("{} {}", "✓".green(), resp.message);
    } else {
        println!("{} {}", "✗".red(), resp.message.yellow());
    }

    Ok(())
}
