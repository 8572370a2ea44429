//! Container execution
//!
//! - `engine`: The [`ContainerEngine`] seam over the local container engine
//! - `cli`: A podman/docker implementation driving the engine's CLI
//! - `runtime`: [`ContainerRuntimeClient`], which runs pipeline steps as
//!   containers on top of any engine

mod cli;
mod engine;
mod runtime;

pub use cli::CliEngine;
pub use engine::{ContainerEngine, LineStream, LogLine, OutputStream};
pub use runtime::{ContainerRuntimeClient, StepSink};

use thiserror::Error;

/// Errors raised by container operations
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' failed (exit {code}): {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("failed to pull image {image} after {attempts} attempts: {reason}")]
    PullFailed {
        image: String,
        attempts: u32,
        reason: String,
    },

    #[error("container {id} exited with code {code}")]
    NonZeroExit { id: String, code: i64, logs: String },

    #[error("invalid container step: {0}")]
    InvalidStep(String),

    #[error("unexpected engine output: {0}")]
    Parse(String),

    #[error("container operation canceled")]
    Canceled,
}
