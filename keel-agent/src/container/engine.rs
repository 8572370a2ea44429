//! Container engine seam

use async_trait::async_trait;
use futures_util::Stream;
use keel_core::domain::pipeline::ContainerSpec;
use std::pin::Pin;

use super::ContainerError;

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A single line of container or engine output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: OutputStream,
    pub text: String,
}

impl LogLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// Stream of output lines; an `Err` item is the last item
pub type LineStream = Pin<Box<dyn Stream<Item = Result<LogLine, ContainerError>> + Send>>;

/// Operations the agent needs from a local container engine
///
/// Every method is a thin, single-shot call. Retrying and cleanup policy
/// live in [`super::ContainerRuntimeClient`].
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether `image` is present in the local image store
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError>;

    /// Pull `image`, streaming progress lines
    async fn pull_image(&self, image: &str) -> Result<LineStream, ContainerError>;

    /// Create (but do not start) a container, returning its id
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, ContainerError>;

    async fn start(&self, id: &str) -> Result<(), ContainerError>;

    /// Block until the container leaves the running state
    ///
    /// # Returns
    /// The container's exit code
    async fn wait(&self, id: &str) -> Result<i64, ContainerError>;

    /// Container output; with `follow` the stream lasts until the container exits
    async fn logs(
        &self,
        id: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<LineStream, ContainerError>;

    async fn stop(&self, id: &str) -> Result<(), ContainerError>;

    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError>;

    async fn restart(&self, id: &str) -> Result<(), ContainerError>;

    /// Number of containers currently running
    async fn running_count(&self) -> Result<u32, ContainerError>;
}
