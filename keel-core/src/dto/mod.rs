//! Data Transfer Objects for inter-service communication
//!
//! This module contains the request and response bodies exchanged between
//! the controller, the agents and the CLI. Every RPC of the fleet protocol
//! has its shapes defined here so both ends agree on the wire format.

pub mod container;
pub mod event;
pub mod node;
pub mod pipeline;
