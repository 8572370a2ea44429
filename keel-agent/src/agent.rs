//! Node agent
//!
//! Ties the executor, container runtime and event bus of a node to the
//! controller. While running, three background tasks share one cancellation
//! token:
//! - Heartbeat: reports liveness with the latest metrics and reconnects when
//!   the controller stops acknowledging this node
//! - Metrics: samples node metrics on a fixed interval
//! - Relay: forwards every local event to the controller in batches
//!
//! Executions stay queryable after they finish, up to the configured number
//! of finished ones; the oldest are forgotten first.

use futures_util::{Stream, StreamExt};
use keel_client::ClientError;
use keel_core::domain::event::{Event, EventType, status as code};
use keel_core::domain::log::{LogEntry, LogLevel, LogSource};
use keel_core::domain::node::{NodeInfo, NodeMetrics};
use keel_core::domain::pipeline::{Pipeline, PipelineStatus};
use keel_core::dto::container::ContainerAction;
use keel_core::dto::node::RegisterRequest;
use keel_core::event_bus::{EventBus, Subscription};
use keel_core::retry::{RetryConfig, RetryableError, retry};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::container::{ContainerError, ContainerRuntimeClient, OutputStream};
use crate::executor::{ExecutorError, PipelineExecutor, PipelineRun};
use crate::link::ControllerLink;
use crate::log_hub::LogHub;
use crate::metrics::MetricsSource;

/// How often buffered events are forwarded to the controller
const RELAY_INTERVAL: Duration = Duration::from_millis(500);

/// Events forwarded per request at most
const RELAY_BATCH: usize = 100;

/// Stream of log entries served to API readers
pub type LogStream = Pin<Box<dyn Stream<Item = LogEntry> + Send>>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent is already running")]
    AlreadyRunning,

    #[error("controller rejected the request: {0}")]
    Rejected(String),

    #[error("controller request failed: {0}")]
    Controller(#[from] ClientError),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("execution {0} not found")]
    ExecutionNotFound(String),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

struct Lifecycle {
    running: bool,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct NodeAgent {
    config: Config,
    node_info: NodeInfo,
    link: Arc<dyn ControllerLink>,
    runtime: Arc<ContainerRuntimeClient>,
    executor: Arc<PipelineExecutor>,
    bus: EventBus,
    logs: LogHub,
    metrics_source: Arc<dyn MetricsSource>,
    registration_retry: RetryConfig,
    session_id: RwLock<Option<String>>,
    latest_metrics: RwLock<Option<NodeMetrics>>,
    executions: RwLock<HashMap<String, Arc<PipelineRun>>>,
    lifecycle: Mutex<Lifecycle>,
    retry_count: AtomicU32,
}

impl NodeAgent {
    pub fn new(
        config: Config,
        link: Arc<dyn ControllerLink>,
        runtime: Arc<ContainerRuntimeClient>,
        metrics_source: Arc<dyn MetricsSource>,
        node_info: NodeInfo,
    ) -> Self {
        let bus = EventBus::new();
        let logs = LogHub::new();
        let executor = Arc::new(PipelineExecutor::new(
            config.node_id.clone(),
            runtime.clone(),
            bus.clone(),
            logs.clone(),
        ));

        Self {
            config,
            node_info,
            link,
            runtime,
            executor,
            bus,
            logs,
            metrics_source,
            registration_retry: RetryConfig {
                max_retries: 10,
                initial_delay: Duration::from_millis(500),
                ..RetryConfig::default()
            },
            session_id: RwLock::new(None),
            latest_metrics: RwLock::new(None),
            executions: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle {
                running: false,
                cancel: CancellationToken::new(),
                tasks: Vec::new(),
            }),
            retry_count: AtomicU32::new(0),
        }
    }

    /// Backoff for the registration performed by [`NodeAgent::start`]
    pub fn with_registration_retry(mut self, config: RetryConfig) -> Self {
        self.registration_retry = config;
        self
    }

    /// Backoff applied to every pipeline step
    pub fn with_step_retry(mut self, config: RetryConfig) -> Self {
        self.executor = Arc::new(
            PipelineExecutor::new(
                self.config.node_id.clone(),
                self.runtime.clone(),
                self.bus.clone(),
                self.logs.clone(),
            )
            .with_retry_config(config),
        );
        self
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.running
    }

    /// Failed attempts of the reconnect sequence in progress
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    // =============================================================================
    // Lifecycle
    // =============================================================================

    /// Register with the controller and start the background tasks
    ///
    /// Registration is retried with backoff while the controller is
    /// unreachable; a rejection fails immediately.
    ///
    /// # Errors
    /// The agent is already running or registration did not succeed
    pub async fn start(self: &Arc<Self>) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running {
            return Err(AgentError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let relay = self.bus.subscribe(&EventType::ALL);

        info!(
            "Registering node {} with {}",
            self.config.node_id, self.config.controller_url
        );
        retry(&cancel, &self.registration_retry, || self.register_once())
            .await
            .map_err(|e| AgentError::Registration(e.to_string()))?;

        self.executor.resume();
        self.sample_metrics().await;
        self.publish_node(code::REGISTERED, "registered with controller");

        lifecycle.tasks = vec![
            tokio::spawn(self.clone().heartbeat_loop(cancel.clone())),
            tokio::spawn(self.clone().metrics_loop(cancel.clone())),
            tokio::spawn(self.clone().relay_loop(relay, cancel.clone())),
        ];
        lifecycle.cancel = cancel;
        lifecycle.running = true;

        info!(
            "Agent started: heartbeat every {:?}, metrics every {:?}",
            self.config.heartbeat_interval, self.config.metrics_interval
        );
        Ok(())
    }

    /// Cancel running pipelines and stop the background tasks
    ///
    /// Waits up to the configured grace period; a no-op when not running.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.running {
            return;
        }

        info!("Stopping agent");
        let runs = self.executor.shutdown("agent stopping").await;
        self.publish_node(code::STOPPED, "agent stopping");
        lifecycle.cancel.cancel();

        let tasks = std::mem::take(&mut lifecycle.tasks);
        let drain = async {
            for run in runs {
                run.wait().await;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    error!("Background task failed: {}", e);
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            warn!(
                "Shutdown grace period of {:?} elapsed, proceeding",
                self.config.shutdown_grace
            );
        }

        *self.session_id.write().await = None;
        lifecycle.running = false;
        info!("Agent stopped");
    }

    async fn register_once(&self) -> Result<String, RetryableError<AgentError>> {
        let hostname = if self.node_info.hostname.is_empty() {
            self.config.node_id.clone()
        } else {
            self.node_info.hostname.clone()
        };
        let req = RegisterRequest {
            node_id: self.config.node_id.clone(),
            agent_url: self.config.agent_url(&hostname),
            hostname,
            node_info: self.node_info.clone(),
        };

        match self.link.register(&req).await {
            Ok(resp) if resp.success => {
                info!("Registered with session {}", resp.session_id);
                *self.session_id.write().await = Some(resp.session_id.clone());
                Ok(resp.session_id)
            }
            Ok(resp) => Err(RetryableError::fatal(AgentError::Rejected(resp.message))),
            Err(e) if e.is_transient() => {
                warn!("Registration failed: {}", e);
                Err(RetryableError::retryable(AgentError::Controller(e)))
            }
            Err(e) => Err(RetryableError::fatal(AgentError::Controller(e))),
        }
    }

    // =============================================================================
    // Background Tasks
    // =============================================================================

    async fn heartbeat_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(session_id) = self.session_id().await else {
                self.reconnect(&cancel).await;
                continue;
            };

            if let Err(e) = self.send_heartbeat(&session_id).await {
                warn!("Heartbeat failed: {}", e);
                *self.session_id.write().await = None;
                self.publish_node(code::DISCONNECTED, e.to_string());
                self.reconnect(&cancel).await;
            }
        }

        debug!("Heartbeat loop stopped");
    }

    async fn send_heartbeat(&self, session_id: &str) -> Result<(), AgentError> {
        let metrics = self.latest_metrics.read().await.clone();
        let resp = self
            .link
            .heartbeat(&self.config.node_id, session_id, metrics)
            .await?;

        if !resp.success {
            return Err(AgentError::Rejected("heartbeat not acknowledged".to_string()));
        }
        debug!("Heartbeat acknowledged at {}", resp.server_time);
        Ok(())
    }

    /// Re-register with a fixed pause between attempts
    ///
    /// # Returns
    /// Whether the node is registered again
    async fn reconnect(&self, cancel: &CancellationToken) -> bool {
        let max = self.config.max_reconnect_attempts;

        for attempt in 1..=max {
            if cancel.is_cancelled() {
                return false;
            }

            info!("Reconnecting to controller (attempt {}/{})", attempt, max);
            match self.register_once().await {
                Ok(_) => {
                    self.retry_count.store(0, Ordering::SeqCst);
                    self.publish_node(code::RECONNECTED, format!("after {} attempt(s)", attempt));
                    return true;
                }
                Err(e) => {
                    self.retry_count.store(attempt, Ordering::SeqCst);
                    warn!("Reconnect attempt {} failed: {}", attempt, e.error);
                }
            }

            if attempt < max {
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                }
            }
        }

        error!("Giving up reconnecting after {} attempts", max);
        self.publish_node(code::RECONNECT_FAILED, format!("after {} attempts", max));
        false
    }

    async fn metrics_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.metrics_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sample_metrics().await;
                    self.prune_executions().await;
                }
            }
        }

        debug!("Metrics loop stopped");
    }

    async fn sample_metrics(&self) {
        match self.metrics_source.collect().await {
            Ok(metrics) => *self.latest_metrics.write().await = Some(metrics),
            Err(e) => warn!("Failed to collect metrics: {:#}", e),
        }
    }

    async fn relay_loop(self: Arc<Self>, mut events: Subscription, cancel: CancellationToken) {
        let mut batch = Vec::new();
        let mut flush = tokio::time::interval(RELAY_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= RELAY_BATCH {
                            self.forward(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = flush.tick() => self.forward(&mut batch).await,
            }
        }

        while let Some(event) = events.try_recv() {
            batch.push(event);
        }
        self.forward(&mut batch).await;
        debug!("Event relay stopped");
    }

    async fn forward(&self, batch: &mut Vec<Event>) {
        if batch.is_empty() {
            return;
        }

        let events = std::mem::take(batch);
        let count = events.len();
        if let Err(e) = self.link.forward_events(&self.config.node_id, events).await {
            warn!("Dropping {} events, forwarding failed: {}", count, e);
        }
    }

    fn publish_node(&self, status: &str, message: impl Into<String>) {
        let message = message.into();
        self.logs
            .node(&self.config.node_id, LogLevel::Info, format!("{}: {}", status, message));
        self.bus
            .publish(Event::node(&self.config.node_id, status, message));
    }

    // =============================================================================
    // Pipelines
    // =============================================================================

    /// Start executing a pipeline dispatched by the controller
    ///
    /// A pipeline without an id is given a generated one.
    ///
    /// # Returns
    /// The execution id
    pub async fn execute_pipeline(&self, mut pipeline: Pipeline) -> Result<String, AgentError> {
        if pipeline.id.is_empty() {
            pipeline.id = uuid::Uuid::new_v4().to_string();
        }

        let run = self.executor.execute(pipeline).await?;
        let id = run.id().to_string();
        self.executions.write().await.insert(id.clone(), run);
        self.prune_executions().await;
        Ok(id)
    }

    /// Forget the oldest finished executions beyond the retention limit
    async fn prune_executions(&self) {
        let mut executions = self.executions.write().await;
        let mut finished: Vec<_> = executions
            .iter()
            .filter_map(|(id, run)| run.finished_at().map(|at| (at, id.clone())))
            .collect();

        let excess = finished
            .len()
            .saturating_sub(self.config.retained_executions);
        if excess == 0 {
            return;
        }

        finished.sort();
        for (_, id) in finished.into_iter().take(excess) {
            executions.remove(&id);
        }
        debug!("Forgot {} finished execution(s)", excess);
    }

    pub async fn pipeline_status(&self, execution_id: &str) -> Result<PipelineStatus, AgentError> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .map(|run| run.status())
            .ok_or_else(|| AgentError::ExecutionNotFound(execution_id.to_string()))
    }

    pub async fn cancel_pipeline(
        &self,
        execution_id: &str,
        reason: &str,
    ) -> Result<PipelineStatus, AgentError> {
        let run = self
            .executions
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| AgentError::ExecutionNotFound(execution_id.to_string()))?;

        match self.executor.cancel(execution_id, reason).await {
            Ok(status) => Ok(status),
            Err(ExecutorError::NotFound(id)) => Err(ExecutorError::NotRunning {
                id,
                state: run.status().state,
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn running_pipelines(&self) -> Vec<String> {
        self.executor.running_ids().await
    }

    // =============================================================================
    // Containers
    // =============================================================================

    pub async fn container_action(
        &self,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<(), AgentError> {
        let status = match action {
            ContainerAction::Start => {
                self.runtime.start_container(container_id).await?;
                code::RUNNING
            }
            ContainerAction::Stop => {
                self.runtime.stop_container(container_id).await?;
                code::STOPPED
            }
            ContainerAction::Restart => {
                self.runtime.restart_container(container_id).await?;
                code::RESTARTED
            }
        };

        info!("Container {}: {}", container_id, action.as_str());
        self.bus.publish(Event::container(
            &self.config.node_id,
            container_id,
            status,
            format!("{} requested", action.as_str()),
        ));
        Ok(())
    }

    // =============================================================================
    // Observation
    // =============================================================================

    /// Latest metrics sample, `None` before the first one
    pub async fn node_metrics(&self) -> Option<NodeMetrics> {
        self.latest_metrics.read().await.clone()
    }

    pub fn subscribe_events(&self, types: &[EventType]) -> Subscription {
        self.bus.subscribe(types)
    }

    /// Every log line produced on this node from now on
    pub fn stream_node_logs(&self) -> LogStream {
        Box::pin(self.logs.stream())
    }

    /// Output of a single container, read from the engine
    ///
    /// The stream ends when the container's output ends or the engine
    /// reports an error.
    pub async fn stream_container_logs(
        &self,
        container_id: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<LogStream, AgentError> {
        let lines = self.runtime.stream_logs(container_id, follow, tail).await?;
        let source_id = container_id.to_string();

        let entries = lines
            .take_while(|line| std::future::ready(line.is_ok()))
            .filter_map(move |line| {
                let entry = line.ok().map(|line| {
                    let level = match line.stream {
                        OutputStream::Stdout => LogLevel::Info,
                        OutputStream::Stderr => LogLevel::Warning,
                    };
                    LogEntry::new(LogSource::Container, source_id.clone(), level, line.text)
                });
                std::future::ready(entry)
            });
        Ok(Box::pin(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        Behaviour, FakeEngine, FakeLink, FakeMetrics, container_step, eventually, pipeline,
    };
    use keel_core::domain::pipeline::PipelineState;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn test_config() -> Config {
        let mut config = Config::new("node-1".to_string(), "http://controller:8080".to_string());
        config.heartbeat_interval = Duration::from_millis(20);
        config.metrics_interval = Duration::from_millis(20);
        config.reconnect_interval = Duration::from_millis(5);
        config.max_reconnect_attempts = 2;
        config.shutdown_grace = Duration::from_secs(2);
        config
    }

    fn agent(link: &Arc<FakeLink>, engine: &Arc<FakeEngine>) -> Arc<NodeAgent> {
        agent_with(link, engine, test_config())
    }

    fn agent_with(link: &Arc<FakeLink>, engine: &Arc<FakeEngine>, config: Config) -> Arc<NodeAgent> {
        let runtime = ContainerRuntimeClient::new(engine.clone())
            .with_pull_interval(Duration::from_millis(1));
        let info = NodeInfo {
            hostname: "worker-1".to_string(),
            ..Default::default()
        };

        Arc::new(
            NodeAgent::new(
                config,
                link.clone(),
                Arc::new(runtime),
                Arc::new(FakeMetrics::default()),
                info,
            )
            .with_registration_retry(fast_retry())
            .with_step_retry(fast_retry()),
        )
    }

    async fn finished(agent: &NodeAgent, id: &str) -> PipelineStatus {
        for _ in 0..400 {
            let status = agent.pipeline_status(id).await.unwrap();
            if status.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution {} did not finish", id);
    }

    async fn wait_for_status(sub: &mut Subscription, status: &str) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = sub.recv().await {
                if event.status == status {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_start_registers_and_heartbeats() {
        let link = Arc::new(FakeLink::default());
        let agent = agent(&link, &Arc::new(FakeEngine::default()));

        agent.start().await.unwrap();

        let registrations = link.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].node_id, "node-1");
        assert_eq!(registrations[0].agent_url, "http://worker-1:7070");
        assert_eq!(agent.session_id().await.as_deref(), Some("session-1"));
        assert!(agent.node_metrics().await.is_some());

        assert!(eventually(|| link.heartbeats().len() >= 2).await);
        assert!(link.heartbeats().iter().all(|s| s == "session-1"));

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_an_error_and_stop_is_idempotent() {
        let link = Arc::new(FakeLink::default());
        let agent = agent(&link, &Arc::new(FakeEngine::default()));

        agent.stop().await;
        agent.start().await.unwrap();
        assert!(matches!(agent.start().await, Err(AgentError::AlreadyRunning)));

        agent.stop().await;
        agent.stop().await;
        assert!(!agent.is_running().await);
        assert_eq!(agent.session_id().await, None);
    }

    #[tokio::test]
    async fn test_registration_retries_while_controller_unreachable() {
        let link = Arc::new(FakeLink::default());
        link.fail_registers(2);
        let agent = agent(&link, &Arc::new(FakeEngine::default()));

        agent.start().await.unwrap();

        assert_eq!(link.registrations().len(), 3);
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_rejected_registration_fails_start() {
        let link = Arc::new(FakeLink::default());
        link.reject_registers(true);
        let agent = agent(&link, &Arc::new(FakeEngine::default()));

        assert!(matches!(
            agent.start().await,
            Err(AgentError::Registration(_))
        ));
        assert_eq!(link.registrations().len(), 1);
        assert!(!agent.is_running().await);
    }

    #[tokio::test]
    async fn test_rejected_heartbeat_reconnects_with_new_session() {
        let link = Arc::new(FakeLink::default());
        let agent = agent(&link, &Arc::new(FakeEngine::default()));
        let mut events = agent.subscribe_events(&[EventType::Node]);

        agent.start().await.unwrap();
        link.reject_heartbeats(1);

        assert!(wait_for_status(&mut events, code::DISCONNECTED).await);
        assert!(wait_for_status(&mut events, code::RECONNECTED).await);
        assert_eq!(agent.session_id().await.as_deref(), Some("session-2"));
        assert_eq!(agent.retry_count(), 0);

        assert!(
            eventually(|| link
                .forwarded()
                .iter()
                .any(|e| e.status == code::RECONNECTED))
            .await
        );
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let link = Arc::new(FakeLink::default());
        let agent = agent(&link, &Arc::new(FakeEngine::default()));
        let mut events = agent.subscribe_events(&[EventType::Node]);

        agent.start().await.unwrap();
        link.fail_registers(u32::MAX);
        link.fail_heartbeats(1);

        assert!(wait_for_status(&mut events, code::RECONNECT_FAILED).await);
        assert_eq!(agent.session_id().await, None);
        assert!(agent.retry_count() >= 1);

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_executions_stay_queryable_after_finishing() {
        let link = Arc::new(FakeLink::default());
        let engine = Arc::new(FakeEngine::default());
        let agent = agent(&link, &engine);

        let id = agent
            .execute_pipeline(pipeline("p1", vec![container_step("build", "builder")]))
            .await
            .unwrap();
        assert_eq!(id, "p1");

        let mut done = false;
        for _ in 0..200 {
            if agent.pipeline_status(&id).await.unwrap().state == PipelineState::Completed {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(done);

        assert!(matches!(
            agent.cancel_pipeline(&id, "too late").await,
            Err(AgentError::Executor(ExecutorError::NotRunning {
                state: PipelineState::Completed,
                ..
            }))
        ));
        assert!(matches!(
            agent.pipeline_status("unknown").await,
            Err(AgentError::ExecutionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pipeline_without_id_gets_one() {
        let link = Arc::new(FakeLink::default());
        let agent = agent(&link, &Arc::new(FakeEngine::default()));

        let id = agent
            .execute_pipeline(pipeline("", vec![container_step("build", "builder")]))
            .await
            .unwrap();

        assert!(!id.is_empty());
        assert!(agent.pipeline_status(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_container_actions_publish_events() {
        let link = Arc::new(FakeLink::default());
        let engine = Arc::new(FakeEngine::default());
        engine.add_running("web");
        let agent = agent(&link, &engine);
        let mut events = agent.subscribe_events(&[EventType::Container]);

        agent
            .container_action("web", ContainerAction::Stop)
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.entity_id, "web");
        assert_eq!(event.status, code::STOPPED);

        assert!(matches!(
            agent.container_action("ghost", ContainerAction::Restart).await,
            Err(AgentError::Container(ContainerError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_container_logs_are_log_entries() {
        let link = Arc::new(FakeLink::default());
        let engine = Arc::new(FakeEngine::default());
        engine.add_running("web");
        let agent = agent(&link, &engine);

        let entries: Vec<LogEntry> = agent
            .stream_container_logs("web", false, None)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, LogSource::Container);
        assert_eq!(entries[0].source_id, "web");
        assert_eq!(entries[0].content, "already running");
    }

    #[tokio::test]
    async fn test_stop_cancels_pipelines_and_flushes_events() {
        let link = Arc::new(FakeLink::default());
        let engine = Arc::new(FakeEngine::default());
        engine.set_behaviour("sleeper", Behaviour::hang(&[]));
        let agent = agent(&link, &engine);

        agent.start().await.unwrap();
        let id = agent
            .execute_pipeline(pipeline("long", vec![container_step("serve", "sleeper")]))
            .await
            .unwrap();
        assert!(eventually(|| engine.running() == 1).await);

        agent.stop().await;

        let status = agent.pipeline_status(&id).await.unwrap();
        assert_eq!(status.state, PipelineState::Canceled);
        assert_eq!(
            status.error_message.as_deref(),
            Some("pipeline canceled: agent stopping")
        );

        let forwarded = link.forwarded();
        assert!(forwarded.iter().any(|e| e.status == code::STOPPED));
        assert!(forwarded.iter().any(|e| e.status == code::CANCELED));
        assert!(agent.running_pipelines().await.is_empty());
    }

    #[tokio::test]
    async fn test_restarted_agent_accepts_pipelines() {
        let link = Arc::new(FakeLink::default());
        let agent = agent(&link, &Arc::new(FakeEngine::default()));

        agent.start().await.unwrap();
        agent.stop().await;
        agent.start().await.unwrap();

        let id = agent
            .execute_pipeline(pipeline("p1", vec![container_step("build", "builder")]))
            .await
            .unwrap();
        assert_eq!(finished(&agent, &id).await.state, PipelineState::Completed);

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_oldest_finished_executions_are_forgotten() {
        let link = Arc::new(FakeLink::default());
        let engine = Arc::new(FakeEngine::default());
        engine.set_behaviour("sleeper", Behaviour::hang(&[]));
        let mut config = test_config();
        config.retained_executions = 3;
        let agent = agent_with(&link, &engine, config);

        let long = agent
            .execute_pipeline(pipeline("long", vec![container_step("serve", "sleeper")]))
            .await
            .unwrap();
        for i in 0..10 {
            let id = agent
                .execute_pipeline(pipeline(&format!("p{}", i), vec![container_step("build", "builder")]))
                .await
                .unwrap();
            finished(&agent, &id).await;
        }
        agent.prune_executions().await;

        assert_eq!(agent.executions.read().await.len(), 4);
        assert!(agent.pipeline_status(&long).await.is_ok());
        for id in ["p7", "p8", "p9"] {
            assert!(agent.pipeline_status(id).await.is_ok(), "{} forgotten", id);
        }
        assert!(matches!(
            agent.pipeline_status("p0").await,
            Err(AgentError::ExecutionNotFound(_))
        ));

        agent.cancel_pipeline(&long, "test over").await.unwrap();
    }
}
