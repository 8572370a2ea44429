//! Keel Core
//!
//! Core types and abstractions shared by the Keel controller, agent, client
//! and CLI.
//!
//! This crate contains:
//! - Domain types: Pipelines, node descriptions, events and log entries
//! - DTOs: Request/response bodies for every controller and agent call
//! - `retry`: Exponential backoff for transient failures
//! - `event_bus`: In-process publish/subscribe with drop-on-full delivery

pub mod domain;
pub mod dto;
pub mod event_bus;
pub mod retry;
