//! Keel Agent
//!
//! Runs on every worker node. Registers with the controller, reports
//! liveness and metrics, and executes pipelines dispatched to this node as
//! sequences of containers.
//!
//! Architecture:
//! - `config`: Settings from environment or defaults
//! - `container`: Container engine seam and the step runner built on it
//! - `executor`: Pipeline state machine, one task per pipeline
//! - `agent`: Controller connection, background tasks and node operations
//! - `api`: HTTP endpoints the controller calls

pub mod agent;
pub mod api;
pub mod config;
pub mod container;
pub mod executor;
pub mod link;
pub mod log_hub;
pub mod metrics;

#[cfg(test)]
mod testing;
