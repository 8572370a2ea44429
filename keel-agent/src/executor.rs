//! Pipeline executor
//!
//! Runs pipelines on this node, one task per pipeline, with steps executed
//! strictly in order. Each step goes through [`retry`] so infrastructure
//! failures are retried while a failing workload stops the pipeline.
//!
//! All state changes of a run happen under its status lock, and the matching
//! event is published before the lock is released. A subscriber therefore
//! sees a run's events in the order its status changed, e.g. `step_failed`
//! always before `failed`.
//!
//! A run stays in the running map until it reaches a terminal state.

use chrono::{DateTime, Utc};
use keel_core::domain::event::{Event, status as code};
use keel_core::domain::log::{LogEntry, LogLevel, LogSource};
use keel_core::domain::pipeline::{
    Pipeline, PipelineState, PipelineStatus, StepState, TransitionError, ValidationError,
};
use keel_core::event_bus::EventBus;
use keel_core::retry::{RetryConfig, RetryError, retry};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::container::{ContainerError, ContainerRuntimeClient, LogLine, OutputStream, StepSink};
use crate::log_hub::LogHub;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid pipeline: {0}")]
    Invalid(#[from] ValidationError),

    #[error("pipeline {0} is already running")]
    AlreadyRunning(String),

    #[error("pipeline {0} not found")]
    NotFound(String),

    #[error("pipeline {id} is not running (state: {state})")]
    NotRunning { id: String, state: PipelineState },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("executor is shut down")]
    ShutDown,
}

// =============================================================================
// Runs
// =============================================================================

/// A single execution of a pipeline
pub struct PipelineRun {
    pipeline: Pipeline,
    status: Mutex<PipelineStatus>,
    /// Containers created for the current step and not yet removed
    containers: Mutex<HashSet<String>>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

impl PipelineRun {
    fn new(pipeline: Pipeline, status: PipelineStatus, cancel: CancellationToken) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            pipeline,
            status: Mutex::new(status),
            containers: Mutex::new(HashSet::new()),
            cancel,
            done,
        }
    }

    pub fn id(&self) -> &str {
        &self.pipeline.id
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Snapshot of the current status
    pub fn status(&self) -> PipelineStatus {
        self.lock_status().clone()
    }

    /// When the run reached a terminal state, `None` while it is going
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        let status = self.lock_status();
        status
            .state
            .is_terminal()
            .then(|| status.end_time.unwrap_or_else(Utc::now))
    }

    /// Whether the run's task has finished
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until the run's task has finished
    ///
    /// # Returns
    /// The final status
    pub async fn wait(&self) -> PipelineStatus {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
        self.status()
    }

    /// Ids of containers currently associated with the run
    pub fn containers(&self) -> Vec<String> {
        lock(&self.containers).iter().cloned().collect()
    }

    fn lock_status(&self) -> MutexGuard<'_, PipelineStatus> {
        lock(&self.status)
    }

    fn mark_done(&self) {
        self.done.send_replace(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collects container events and output of one step
struct RunSink<'a> {
    run: &'a PipelineRun,
    step_index: usize,
    node_id: &'a str,
    bus: &'a EventBus,
    logs: &'a LogHub,
}

impl StepSink for RunSink<'_> {
    fn container_event(&self, container_id: &str, status: &str, message: &str) {
        match status {
            code::CREATED => {
                lock(&self.run.containers).insert(container_id.to_string());
            }
            code::REMOVED => {
                lock(&self.run.containers).remove(container_id);
            }
            _ => {}
        }
        self.bus
            .publish(Event::container(self.node_id, container_id, status, message));
    }

    fn log_line(&self, container_id: &str, line: &LogLine) {
        if let Ok(step) = self.run.lock_status().step_mut(self.step_index) {
            step.append_logs(line.text.as_bytes());
            step.append_logs(b"\n");
        }

        let level = match line.stream {
            OutputStream::Stdout => LogLevel::Info,
            OutputStream::Stderr => LogLevel::Warning,
        };
        self.logs.publish(LogEntry::new(
            LogSource::Container,
            container_id,
            level,
            line.text.clone(),
        ));
    }
}

// =============================================================================
// Executor
// =============================================================================

pub struct PipelineExecutor {
    node_id: String,
    runtime: Arc<ContainerRuntimeClient>,
    bus: EventBus,
    logs: LogHub,
    running: RwLock<HashMap<String, Arc<PipelineRun>>>,
    retry_config: RetryConfig,
    /// Replaced by [`PipelineExecutor::resume`] after a shutdown
    shutdown: Mutex<CancellationToken>,
}

impl PipelineExecutor {
    pub fn new(
        node_id: impl Into<String>,
        runtime: Arc<ContainerRuntimeClient>,
        bus: EventBus,
        logs: LogHub,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            runtime,
            bus,
            logs,
            running: RwLock::new(HashMap::new()),
            retry_config: RetryConfig::default(),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Override the backoff applied to each step
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn runtime(&self) -> &Arc<ContainerRuntimeClient> {
        &self.runtime
    }

    /// Start executing a pipeline in the background
    ///
    /// The pipeline is validated and registered as running before this
    /// returns; its outcome is only observable through status and events.
    ///
    /// # Returns
    /// The run handle
    ///
    /// # Errors
    /// The pipeline is invalid, a pipeline with the same id is running, or
    /// the executor has been shut down
    pub async fn execute(
        self: &Arc<Self>,
        pipeline: Pipeline,
    ) -> Result<Arc<PipelineRun>, ExecutorError> {
        pipeline.validate()?;

        let shutdown = lock(&self.shutdown).clone();
        if shutdown.is_cancelled() {
            return Err(ExecutorError::ShutDown);
        }

        let run = {
            let mut running = self.running.write().await;
            if running.contains_key(&pipeline.id) {
                return Err(ExecutorError::AlreadyRunning(pipeline.id));
            }

            let mut status = PipelineStatus::new(&pipeline);
            status.transition(PipelineState::Running)?;

            let run = Arc::new(PipelineRun::new(
                pipeline,
                status,
                shutdown.child_token(),
            ));
            running.insert(run.id().to_string(), run.clone());
            run
        };

        info!(
            "Starting pipeline {} ({} steps)",
            run.id(),
            run.pipeline.steps.len()
        );
        self.publish(&run, code::STARTED, run.pipeline.name.clone());

        let executor = self.clone();
        let task_run = run.clone();
        tokio::spawn(async move {
            executor.run_pipeline(&task_run).await;
        });

        Ok(run)
    }

    async fn run_pipeline(&self, run: &Arc<PipelineRun>) {
        for (index, step) in run.pipeline.steps.iter().enumerate() {
            if !self.begin_step(run, index) {
                break;
            }

            let sink = RunSink {
                run,
                step_index: index,
                node_id: &self.node_id,
                bus: &self.bus,
                logs: &self.logs,
            };

            let result = retry(&run.cancel, &self.retry_config, || {
                self.runtime
                    .run_step(step, &run.pipeline.envs, &sink, &run.cancel)
            })
            .await;

            match result {
                Ok(()) => self.complete_step(run, index),
                Err(e) => {
                    self.fail_step(run, index, &e);
                    break;
                }
            }
        }

        {
            let mut status = run.lock_status();
            if status.state == PipelineState::Running {
                match status.transition(PipelineState::Completed) {
                    Ok(()) => {
                        info!("Pipeline {} completed", run.id());
                        self.publish(run, code::COMPLETED, "");
                    }
                    Err(e) => error!("Pipeline {}: {}", run.id(), e),
                }
            }
        }

        self.deregister(run).await;
        run.mark_done();
    }

    /// Mark step `index` running; false if the run already ended
    fn begin_step(&self, run: &PipelineRun, index: usize) -> bool {
        let mut status = run.lock_status();
        if status.state.is_terminal() {
            return false;
        }

        let started = status
            .advance_to(index)
            .and_then(|()| status.transition_step(index, StepState::Running));
        if let Err(e) = started {
            error!("Pipeline {}: {}", run.id(), e);
            return false;
        }

        let name = &run.pipeline.steps[index].name;
        info!("Pipeline {}: step {} '{}' started", run.id(), index, name);
        self.publish(run, code::STEP_STARTED, name.clone());
        true
    }

    fn complete_step(&self, run: &PipelineRun, index: usize) {
        let mut status = run.lock_status();
        if status.state.is_terminal() {
            return;
        }

        let completed = status
            .transition_step(index, StepState::Completed)
            .and_then(|()| status.advance_to(index + 1));
        if let Err(e) = completed {
            error!("Pipeline {}: {}", run.id(), e);
            return;
        }

        let name = &run.pipeline.steps[index].name;
        info!("Pipeline {}: step {} '{}' completed", run.id(), index, name);
        self.publish(run, code::STEP_COMPLETED, name.clone());
    }

    /// Fail step `index` and then the pipeline with the step's error
    fn fail_step(&self, run: &PipelineRun, index: usize, err: &RetryError<ContainerError>) {
        let mut status = run.lock_status();
        if status.state.is_terminal() {
            debug!("Pipeline {} already ended, ignoring: {}", run.id(), err);
            return;
        }

        let message = match err {
            RetryError::Fatal(e) => e.to_string(),
            other => other.to_string(),
        };
        let (state, event) = if is_cancellation(err) {
            (PipelineState::Canceled, code::CANCELED)
        } else {
            (PipelineState::Failed, code::FAILED)
        };

        warn!(
            "Pipeline {}: step {} '{}' failed: {}",
            run.id(),
            index,
            run.pipeline.steps[index].name,
            message
        );

        if let Err(e) = status.fail_step(index, message.clone()) {
            error!("Pipeline {}: {}", run.id(), e);
        }
        self.publish(run, code::STEP_FAILED, message.clone());

        if let Err(e) = status.finish_with_error(state, message.clone()) {
            error!("Pipeline {}: {}", run.id(), e);
            return;
        }
        self.publish(run, event, message);
    }

    /// Cancel a running pipeline
    ///
    /// The step in progress is marked failed and the pipeline canceled.
    /// Containers of the run are stopped; a failed stop is only logged.
    /// Completed steps are left as they are.
    ///
    /// # Returns
    /// The status after cancellation
    pub async fn cancel(&self, id: &str, reason: &str) -> Result<PipelineStatus, ExecutorError> {
        let run = self
            .running
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ExecutorError::NotFound(id.to_string()))?;

        let message = format!("pipeline canceled: {}", reason);
        {
            let mut status = run.lock_status();
            if status.state != PipelineState::Running {
                return Err(ExecutorError::NotRunning {
                    id: id.to_string(),
                    state: status.state,
                });
            }

            let index = status.current_step_index;
            if status
                .step(index)
                .is_some_and(|s| s.state == StepState::Running)
            {
                status.fail_step(index, message.clone())?;
                self.publish(&run, code::STEP_FAILED, message.clone());
            }

            status.finish_with_error(PipelineState::Canceled, message.clone())?;
            self.publish(&run, code::CANCELED, message.clone());
        }

        info!("Canceling pipeline {}: {}", id, reason);

        for container_id in run.containers() {
            if let Err(e) = self.runtime.stop_container(&container_id).await {
                warn!(
                    "Failed to stop container {} of pipeline {}: {}",
                    container_id, id, e
                );
            }
        }
        run.cancel.cancel();

        self.deregister(&run).await;
        Ok(run.status())
    }

    /// Status of a running pipeline
    pub async fn get_status(&self, id: &str) -> Result<PipelineStatus, ExecutorError> {
        self.running
            .read()
            .await
            .get(id)
            .map(|run| run.status())
            .ok_or_else(|| ExecutorError::NotFound(id.to_string()))
    }

    pub async fn running_ids(&self) -> Vec<String> {
        self.running.read().await.keys().cloned().collect()
    }

    /// Cancel every running pipeline and refuse new ones until
    /// [`PipelineExecutor::resume`]
    ///
    /// # Returns
    /// The canceled runs, so callers can wait for their tasks to finish
    pub async fn shutdown(&self, reason: &str) -> Vec<Arc<PipelineRun>> {
        let runs: Vec<_> = self.running.read().await.values().cloned().collect();

        for run in &runs {
            match self.cancel(run.id(), reason).await {
                Ok(_) | Err(ExecutorError::NotFound(_)) | Err(ExecutorError::NotRunning { .. }) => {}
                Err(e) => warn!("Failed to cancel pipeline {}: {}", run.id(), e),
            }
        }
        lock(&self.shutdown).cancel();
        runs
    }

    /// Accept pipelines again after a shutdown
    pub fn resume(&self) {
        let mut shutdown = lock(&self.shutdown);
        if shutdown.is_cancelled() {
            *shutdown = CancellationToken::new();
        }
    }

    async fn deregister(&self, run: &Arc<PipelineRun>) {
        let mut running = self.running.write().await;
        if running
            .get(run.id())
            .is_some_and(|current| Arc::ptr_eq(current, run))
        {
            running.remove(run.id());
        }
    }

    fn publish(&self, run: &PipelineRun, status: &str, message: impl Into<String>) {
        self.bus
            .publish(Event::pipeline(&self.node_id, run.id(), status, message));
    }
}

fn is_cancellation(err: &RetryError<ContainerError>) -> bool {
    match err {
        RetryError::Canceled { .. } => true,
        RetryError::Fatal(ContainerError::Canceled) => true,
        _ => false,
    }
}
