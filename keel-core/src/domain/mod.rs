//! Core domain types
//!
//! This module contains the core domain structures used across Keel services.
//! They are shared between the controller (which tracks nodes and forwards
//! requests) and the agent (which executes pipelines and reports on them).

pub mod event;
pub mod log;
pub mod node;
pub mod pipeline;
