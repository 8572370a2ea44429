//! Terminal rendering shared by the command handlers

use colored::*;
use keel_core::domain::event::{Event, EventType};
use keel_core::domain::log::{LogEntry, LogLevel};
use keel_core::domain::node::NodeMetrics;
use keel_core::domain::pipeline::{PipelineState, PipelineStatus, StepState};
use keel_core::dto::node::NodeSummary;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Print a node summary
pub fn print_node_summary(node: &NodeSummary) {
    println!("  {} Node {}", "▸".cyan(), node.node_id.bold());
    println!("    Host:         {}", node.hostname);
    println!("    Agent:        {}", node.agent_url.dimmed());
    println!(
        "    Last Seen:    {}",
        node.last_seen_at.format(TIME_FORMAT).to_string().dimmed()
    );
    if let Some(metrics) = &node.metrics {
        println!(
            "    Usage:        cpu {:.1}%  mem {:.1}%  containers {}",
            metrics.cpu_usage, metrics.memory_usage, metrics.container_count
        );
    }
    println!();
}

/// Print detailed node information
pub fn print_node_details(node: &NodeSummary) {
    println!("{}", "Node Details:".bold());
    println!("  ID:          {}", node.node_id.cyan());
    println!("  Session:     {}", node.session_id.dimmed());
    println!("  Host:        {}", node.hostname);
    println!("  Agent URL:   {}", node.agent_url);
    println!("  OS / Arch:   {} / {}", node.info.os, node.info.arch);
    if let Some(kernel) = &node.info.kernel {
        println!("  Kernel:      {}", kernel);
    }
    println!(
        "  CPU:         {} core(s){}",
        node.info.hardware.cpu_cores,
        node.info
            .hardware
            .cpu_model
            .as_deref()
            .map(|m| format!(", {}", m))
            .unwrap_or_default()
    );
    println!(
        "  Memory:      {}",
        format_bytes(node.info.hardware.memory_total_bytes)
    );
    println!("  Registered:  {}", node.registered_at.format(TIME_FORMAT));
    println!("  Last Seen:   {}", node.last_seen_at.format(TIME_FORMAT));
    println!("  Subscribers: {}", node.subscriber_count);

    if !node.info.labels.is_empty() {
        println!("\n{}", "Labels:".bold());
        let mut labels: Vec<_> = node.info.labels.iter().collect();
        labels.sort();
        for (key, value) in labels {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if let Some(metrics) = &node.metrics {
        println!();
        print_metrics(metrics);
    }
}

/// Print a metrics sample
pub fn print_metrics(metrics: &NodeMetrics) {
    println!("{}", "Metrics:".bold());
    println!("  CPU:         {}", usage(metrics.cpu_usage));
    println!("  Memory:      {}", usage(metrics.memory_usage));
    println!("  Disk:        {}", usage(metrics.disk_usage));
    println!("  Load:        {:.2}", metrics.load_average);
    println!("  Containers:  {}", metrics.container_count);
    println!(
        "  Collected:   {}",
        metrics.collected_at.format(TIME_FORMAT).to_string().dimmed()
    );
}

/// Print a pipeline status with one line per step
pub fn print_pipeline_status(status: &PipelineStatus) {
    println!("{}", "Pipeline Status:".bold());
    println!("  Execution:   {}", status.pipeline_id.cyan());
    println!("  State:       {}", colorize_pipeline_state(status.state));
    println!(
        "  Progress:    {}/{} ({:.0}%)",
        status
            .steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .count(),
        status.total_steps,
        status.progress() * 100.0
    );
    if let Some(started) = status.start_time {
        println!("  Started:     {}", started.format(TIME_FORMAT));
    }
    if let Some(ended) = status.end_time {
        println!("  Ended:       {}", ended.format(TIME_FORMAT));
        if let Some(started) = status.start_time {
            let seconds = ended.signed_duration_since(started).num_seconds();
            println!("  Duration:    {}s", seconds);
        }
    }
    if let Some(error) = &status.error_message {
        println!("  Error:       {}", error.red());
    }

    println!("\n{}", "Steps:".bold());
    for (index, step) in status.steps.iter().enumerate() {
        let marker = if index == status.current_step_index && status.state == PipelineState::Running
        {
            "▸".cyan()
        } else {
            " ".normal()
        };
        println!(
            "  {} {:>2}. {:<24} {}",
            marker,
            index + 1,
            step.name,
            colorize_step_state(step.state)
        );
        if let Some(error) = &step.error {
            println!("        {}", error.red());
        }
    }
}

/// Print a log entry
pub fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.to_string();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {} {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.source_id.dimmed(),
        log.content
    );
}

/// Print an event
pub fn print_event(event: &Event) {
    let kind = match event.event_type {
        EventType::Node => "node".blue(),
        EventType::Pipeline => "pipeline".magenta(),
        EventType::Container => "container".cyan(),
    };
    let entity = if event.entity_id.is_empty() {
        event.node_id.as_str()
    } else {
        event.entity_id.as_str()
    };

    print!(
        "{} {:<9} {} {}",
        event.timestamp.format("%H:%M:%S").to_string().dimmed(),
        kind,
        entity.bold(),
        colorize_event_status(&event.status)
    );
    if event.message.is_empty() {
        println!();
    } else {
        println!(" {}", event.message.dimmed());
    }
}

/// Colorize pipeline state for display
pub fn colorize_pipeline_state(state: PipelineState) -> ColoredString {
    let label = state.to_string();
    match state {
        PipelineState::Pending => label.yellow(),
        PipelineState::Running => label.cyan(),
        PipelineState::Completed => label.green(),
        PipelineState::Failed => label.red(),
        PipelineState::Canceled => label.dimmed(),
    }
}

fn colorize_step_state(state: StepState) -> ColoredString {
    let label = state.to_string();
    match state {
        StepState::Pending => label.dimmed(),
        StepState::Running => label.cyan(),
        StepState::Completed => label.green(),
        StepState::Failed => label.red(),
        StepState::Skipped => label.yellow(),
    }
}

fn colorize_event_status(status: &str) -> ColoredString {
    match status {
        "completed" | "step_completed" | "registered" | "reconnected" | "running" => {
            status.green()
        }
        "failed" | "step_failed" | "reconnect_failed" | "disconnected" => status.red(),
        "canceled" | "stopped" | "removed" | "exited" => status.yellow(),
        _ => status.normal(),
    }
}

fn usage(percent: f32) -> ColoredString {
    let label = format!("{:.1}%", percent);
    if percent >= 90.0 {
        label.red()
    } else if percent >= 70.0 {
        label.yellow()
    } else {
        label.green()
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(8 * 1024 * 1024 * 1024), "8.0 GiB");
    }
}
