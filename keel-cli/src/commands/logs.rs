//! Log streaming

use anyhow::Result;
use colored::*;
use futures_util::StreamExt;
use keel_core::dto::container::LogQuery;

use crate::config::Config;
use crate::output::print_log_entry;

/// Stream the node log, or a container's output, until it ends or the
/// user interrupts
pub async fn stream_logs(
    config: &Config,
    node: &str,
    container: Option<String>,
    tail: Option<u32>,
    follow: bool,
) -> Result<()> {
    let client = config.client();

    let mut entries = match &container {
        Some(id) => {
            client
                .stream_container_logs(node, id, &LogQuery { follow, tail })
                .await?
        }
        None => {
            if tail.is_some() || follow {
                println!(
                    "{}",
                    "--tail and --follow only apply to container logs; streaming live node log"
                        .dimmed()
                );
            }
            client.stream_node_logs(node).await?
        }
    };

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => break,
            entry = entries.next() => match entry {
                Some(Ok(entry)) => print_log_entry(&entry),
                Some(Err(e)) => {
                    eprintln!("{} {}", "Log stream failed:".red(), e);
                    break;
                }
                None => break,
            },
        }
    }

    Ok(())
}
