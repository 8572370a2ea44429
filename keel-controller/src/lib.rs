//! Keel Controller
//!
//! Central side of the fleet. Accepts node registrations and heartbeats,
//! evicts nodes that stop reporting, relays events to subscribers, and
//! forwards pipeline and container requests to the agent on a node.
//!
//! Architecture:
//! - `config`: Settings from environment or defaults
//! - `fleet`: Connection map, eviction sweep and request routing
//! - `directory`: Node directory collaborator and its in-memory version
//! - `gateway`: Calls from the controller to agents
//! - `api`: HTTP endpoints for agents and operators

pub mod api;
pub mod config;
pub mod directory;
pub mod fleet;
pub mod gateway;

#[cfg(test)]
mod testing;
