//! Event streaming

use anyhow::Result;
use colored::*;
use futures_util::StreamExt;
use keel_core::domain::event::EventType;

use crate::config::Config;
use crate::output::print_event;

/// Print a node's events as they arrive
pub async fn stream_events(config: &Config, node: &str, types: &[String]) -> Result<()> {
    let types = EventType::parse_list(&types.join(",")).map_err(|e| anyhow::anyhow!(e))?;
    let mut events = config.client().subscribe_events(node, &types).await?;

    println!(
        "{}",
        format!("Streaming events of node {} (Ctrl-C to stop)", node).dimmed()
    );

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => break,
            event = events.next() => match event {
                Some(Ok(event)) => print_event(&event),
                Some(Err(e)) => {
                    eprintln!("{} {}", "Event stream failed:".red(), e);
                    break;
                }
                None => {
                    println!("{}", "Event stream closed by the controller.".yellow());
                    break;
                }
            },
        }
    }

    Ok(())
}
