//! Runs pipeline steps as containers
//!
//! A step runs as: ensure image, create, start, follow logs while waiting
//! for exit, remove. Failures are classified for the retry loop:
//! - Engine failures while inspecting, creating, starting or waiting are
//!   retryable
//! - A non-zero exit is the workload's own failure and is not retried
//! - Image pulls retry internally, so a failed pull is not retried again
//!
//! Cleanup after a finished container is best-effort and never turns a
//! successful step into a failed one.

use futures_util::StreamExt;
use keel_core::domain::event::status;
use keel_core::domain::pipeline::{ContainerSpec, Step};
use keel_core::retry::RetryableError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{ContainerEngine, LineStream, LogLine};
use super::ContainerError;

/// Pull attempts before an image is considered unavailable
pub const PULL_ATTEMPTS: u32 = 3;

/// Pause between pull attempts
pub const PULL_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Log lines kept for the error of a failed container
const FAILURE_LOG_TAIL: u32 = 20;

/// How long trailing output is still read after a container exits
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives container lifecycle and output while a step runs
pub trait StepSink: Send + Sync {
    /// A container changed state; `status` is one of the container event codes
    fn container_event(&self, container_id: &str, status: &str, message: &str);

    fn log_line(&self, container_id: &str, line: &LogLine);
}

/// Container operations on top of a [`ContainerEngine`]
pub struct ContainerRuntimeClient {
    engine: Arc<dyn ContainerEngine>,
    pull_interval: Duration,
}

impl ContainerRuntimeClient {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            pull_interval: PULL_RETRY_INTERVAL,
        }
    }

    /// Override the pause between pull attempts
    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    // =============================================================================
    // Images
    // =============================================================================

    /// Make sure `image` is available locally, pulling it if needed
    ///
    /// # Arguments
    /// * `image` - Image reference
    /// * `cancel` - Aborts the pause between pull attempts
    pub async fn ensure_image(
        &self,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ContainerError> {
        if self.engine.image_exists(image).await? {
            debug!("Image {} already present", image);
            return Ok(());
        }

        let mut last_error = String::new();
        for attempt in 1..=PULL_ATTEMPTS {
            info!("Pulling image {} (attempt {}/{})", image, attempt, PULL_ATTEMPTS);

            match self.pull_once(image).await {
                Ok(()) => {
                    info!("Pulled image {}", image);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to pull image {}: {}", image, e);
                    last_error = e.to_string();
                }
            }

            if attempt < PULL_ATTEMPTS {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ContainerError::Canceled),
                    _ = tokio::time::sleep(self.pull_interval) => {}
                }
            }
        }

        Err(ContainerError::PullFailed {
            image: image.to_string(),
            attempts: PULL_ATTEMPTS,
            reason: last_error,
        })
    }

    async fn pull_once(&self, image: &str) -> Result<(), ContainerError> {
        let mut progress = self.engine.pull_image(image).await?;
        let mut last_status: Option<String> = None;

        while let Some(line) = progress.next().await {
            let line = line?;
            if last_status.as_deref() != Some(line.text.as_str()) {
                info!("Pulling {}: {}", image, line.text);
                last_status = Some(line.text);
            }
        }

        Ok(())
    }

    // =============================================================================
    // Steps
    // =============================================================================

    /// Run a container step to completion
    ///
    /// # Arguments
    /// * `step` - The step to run; must carry a container spec
    /// * `pipeline_env` - Pipeline-wide environment, overridden by the step's own
    /// * `sink` - Receives container events and output lines
    /// * `cancel` - Stops waiting and force-removes the container
    ///
    /// # Returns
    /// `Ok` when the container exited with code 0; otherwise an error
    /// classified for [`keel_core::retry::retry`]
    pub async fn run_step(
        &self,
        step: &Step,
        pipeline_env: &HashMap<String, String>,
        sink: &dyn StepSink,
        cancel: &CancellationToken,
    ) -> Result<(), RetryableError<ContainerError>> {
        let spec = step_spec(step, pipeline_env).map_err(RetryableError::fatal)?;

        self.ensure_image(&spec.image, cancel)
            .await
            .map_err(|e| match e {
                ContainerError::PullFailed { .. } | ContainerError::Canceled => {
                    RetryableError::fatal(e)
                }
                other => RetryableError::retryable(other),
            })?;

        let name = container_name();
        let id = self
            .engine
            .create(&name, &spec)
            .await
            .map_err(RetryableError::retryable)?;
        info!("Created container {} ({}) for step '{}'", name, id, step.name);
        sink.container_event(&id, status::CREATED, &step.name);

        if let Err(e) = self.engine.start(&id).await {
            warn!("Failed to start container {}: {}", id, e);
            self.cleanup(&id, sink).await;
            return Err(RetryableError::retryable(e));
        }
        sink.container_event(&id, status::RUNNING, &step.name);

        let follow_logs = async {
            match self.engine.logs(&id, true, None).await {
                Ok(mut lines) => {
                    while let Some(Ok(line)) = lines.next().await {
                        sink.log_line(&id, &line);
                    }
                }
                Err(e) => warn!("Failed to attach to logs of {}: {}", id, e),
            }
        };
        let run_to_exit = async {
            let wait = self.engine.wait(&id);
            tokio::pin!(wait, follow_logs);

            let mut logs_done = false;
            let code = tokio::select! {
                code = &mut wait => code,
                () = &mut follow_logs => {
                    logs_done = true;
                    (&mut wait).await
                }
            };

            // A failed wait leaves the follower attached to a live container
            if code.is_ok()
                && !logs_done
                && tokio::time::timeout(LOG_DRAIN_TIMEOUT, &mut follow_logs)
                    .await
                    .is_err()
            {
                debug!("Output of {} still open after exit, detaching", id);
            }
            code
        };

        let exit = tokio::select! {
            _ = cancel.cancelled() => None,
            code = run_to_exit => Some(code),
        };

        let code = match exit {
            None => {
                info!("Step '{}' canceled, removing container {}", step.name, id);
                self.cleanup(&id, sink).await;
                return Err(RetryableError::fatal(ContainerError::Canceled));
            }
            Some(Err(e)) => {
                warn!("Failed waiting for container {}: {}", id, e);
                self.cleanup(&id, sink).await;
                return Err(RetryableError::retryable(e));
            }
            Some(Ok(code)) => code,
        };

        sink.container_event(&id, status::EXITED, &format!("exit code {}", code));

        if code != 0 {
            let logs = self.tail_logs(&id).await;
            warn!(
                "Container {} for step '{}' exited with code {}",
                id, step.name, code
            );
            self.cleanup(&id, sink).await;
            return Err(RetryableError::fatal(ContainerError::NonZeroExit { id, code, logs }));
        }

        self.cleanup(&id, sink).await;
        Ok(())
    }

    /// Last lines of a container's output, for diagnostics
    async fn tail_logs(&self, id: &str) -> String {
        let mut lines = match self.engine.logs(id, false, Some(FAILURE_LOG_TAIL)).await {
            Ok(lines) => lines,
            Err(e) => {
                debug!("Could not read logs of {}: {}", id, e);
                return String::new();
            }
        };

        let mut out = Vec::new();
        while let Some(Ok(line)) = lines.next().await {
            out.push(line.text);
        }
        out.join("\n")
    }

    /// Force-remove a container; failures are only logged
    async fn cleanup(&self, id: &str, sink: &dyn StepSink) {
        match self.remove_container(id).await {
            Ok(()) => sink.container_event(id, status::REMOVED, ""),
            Err(e) => warn!("Failed to remove container {}: {}", id, e),
        }
    }

    // =============================================================================
    // Direct Control
    // =============================================================================

    pub async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.engine.start(id).await
    }

    pub async fn stop_container(&self, id: &str) -> Result<(), ContainerError> {
        self.engine.stop(id).await
    }

    pub async fn restart_container(&self, id: &str) -> Result<(), ContainerError> {
        self.engine.restart(id).await
    }

    /// Force-remove a container; a container that is already gone is fine
    pub async fn remove_container(&self, id: &str) -> Result<(), ContainerError> {
        match self.engine.remove(id, true).await {
            Err(ContainerError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    pub async fn stream_logs(
        &self,
        id: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<LineStream, ContainerError> {
        self.engine.logs(id, follow, tail).await
    }
}

/// The step's container spec with the pipeline environment merged in
fn step_spec(
    step: &Step,
    pipeline_env: &HashMap<String, String>,
) -> Result<ContainerSpec, ContainerError> {
    let mut spec = step
        .container
        .clone()
        .ok_or_else(|| ContainerError::InvalidStep(format!("step '{}' has no container", step.name)))?;

    let mut environment = pipeline_env.clone();
    environment.extend(spec.environment);
    spec.environment = environment;
    Ok(spec)
}

fn container_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("keel-{}", &id[..12])
}
