//! In-memory doubles for the agent's seams

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use keel_client::ClientError;
use keel_core::domain::event::Event;
use keel_core::domain::node::NodeMetrics;
use keel_core::domain::pipeline::{ContainerSpec, Pipeline, STEP_TYPE_CONTAINER, Step};
use keel_core::dto::node::{HeartbeatResponse, RegisterRequest, RegisterResponse};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use crate::container::{ContainerEngine, ContainerError, LineStream, LogLine, StepSink};
use crate::link::ControllerLink;
use crate::metrics::MetricsSource;

/// Exit code recorded for containers that were stopped or removed while running
const KILLED: i64 = 137;

pub fn container_step(name: &str, image: &str) -> Step {
    Step {
        name: name.to_string(),
        step_type: STEP_TYPE_CONTAINER.to_string(),
        container: Some(ContainerSpec {
            image: image.to_string(),
            ..Default::default()
        }),
    }
}

pub fn pipeline(id: &str, steps: Vec<Step>) -> Pipeline {
    Pipeline {
        id: id.to_string(),
        name: format!("{}-name", id),
        description: None,
        steps,
        envs: HashMap::new(),
        args: HashMap::new(),
    }
}

/// Poll `check` for up to two seconds
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

// =============================================================================
// Container engine
// =============================================================================

/// What a container created from an image does once started
#[derive(Debug, Clone)]
pub enum Behaviour {
    Exit { code: i64, output: Vec<String> },
    /// Runs until stopped or removed
    Hang { output: Vec<String> },
}

impl Behaviour {
    pub fn exit(code: i64, output: &[&str]) -> Self {
        Behaviour::Exit {
            code,
            output: output.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn hang(output: &[&str]) -> Self {
        Behaviour::Hang {
            output: output.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn output(&self) -> Vec<String> {
        match self {
            Behaviour::Exit { output, .. } | Behaviour::Hang { output } => output.clone(),
        }
    }
}

struct FakeContainer {
    behaviour: Behaviour,
    started: bool,
    exit: watch::Sender<Option<i64>>,
}

impl FakeContainer {
    fn kill(&self) {
        if self.exit.borrow().is_none() {
            self.exit.send_replace(Some(KILLED));
        }
    }
}

#[derive(Default)]
struct EngineState {
    calls: Vec<String>,
    missing_images: HashSet<String>,
    behaviours: HashMap<String, Behaviour>,
    pull_failures: u32,
    create_failures: u32,
    wait_failures: u32,
    inspect_failures: u32,
    containers: HashMap<String, FakeContainer>,
    created: Vec<ContainerSpec>,
    next_id: u32,
}

/// Container engine keeping containers in memory
///
/// Every image is present unless removed, and a container exits with code 0
/// and no output unless its image was given a [`Behaviour`].
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, EngineState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    pub fn set_behaviour(&self, image: &str, behaviour: Behaviour) {
        self.state().behaviours.insert(image.to_string(), behaviour);
    }

    pub fn remove_image(&self, image: &str) {
        self.state().missing_images.insert(image.to_string());
    }

    pub fn fail_next_pulls(&self, count: u32) {
        self.state().pull_failures = count;
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.state().create_failures = count;
    }

    /// Fail `wait` without touching the container, which keeps running
    pub fn fail_next_waits(&self, count: u32) {
        self.state().wait_failures = count;
    }

    pub fn fail_next_inspects(&self, count: u32) {
        self.state().inspect_failures = count;
    }

    /// Add a running container that was not created through a pipeline
    pub fn add_running(&self, id: &str) {
        let (exit, _) = watch::channel(None);
        self.state().containers.insert(
            id.to_string(),
            FakeContainer {
                behaviour: Behaviour::hang(&["already running"]),
                started: true,
                exit,
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state().created.clone()
    }

    /// Containers that have not been removed
    pub fn live_containers(&self) -> usize {
        self.state().containers.len()
    }

    /// Containers started and not yet exited
    pub fn running(&self) -> usize {
        self.state()
            .containers
            .values()
            .filter(|c| c.started && c.exit.borrow().is_none())
            .count()
    }

    fn not_found(id: &str) -> ContainerError {
        ContainerError::NotFound(id.to_string())
    }
}

fn engine_failure(verb: &str) -> ContainerError {
    ContainerError::Command {
        command: format!("fake {}", verb),
        code: 125,
        stderr: "engine unavailable".to_string(),
    }
}

fn lines(output: Vec<String>) -> Vec<Result<LogLine, ContainerError>> {
    output.into_iter().map(|l| Ok(LogLine::stdout(l))).collect()
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        let mut state = self.record(format!("image_exists {}", image));
        if state.inspect_failures > 0 {
            state.inspect_failures -= 1;
            return Err(engine_failure("image exists"));
        }
        Ok(!state.missing_images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<LineStream, ContainerError> {
        let mut state = self.record(format!("pull {}", image));
        if state.pull_failures > 0 {
            state.pull_failures -= 1;
            return Err(engine_failure("pull"));
        }
        state.missing_images.remove(image);

        let progress = vec![
            "Trying to pull".to_string(),
            "Trying to pull".to_string(),
            "Writing manifest".to_string(),
        ];
        Ok(Box::pin(futures_util::stream::iter(lines(progress))))
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let mut state = self.record(format!("create {}", name));
        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(engine_failure("create"));
        }

        state.next_id += 1;
        let id = format!("ctr-{}", state.next_id);
        let behaviour = state
            .behaviours
            .get(&spec.image)
            .cloned()
            .unwrap_or_else(|| Behaviour::exit(0, &[]));
        let (exit, _) = watch::channel(None);

        state.containers.insert(
            id.clone(),
            FakeContainer {
                behaviour,
                started: false,
                exit,
            },
        );
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        let mut state = self.record(format!("start {}", id));
        let container = state.containers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        container.started = true;
        if let Behaviour::Exit { code, .. } = container.behaviour {
            container.exit.send_replace(Some(code));
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, ContainerError> {
        let mut rx = {
            let mut state = self.record(format!("wait {}", id));
            if state.wait_failures > 0 {
                state.wait_failures -= 1;
                return Err(engine_failure("wait"));
            }
            state
                .containers
                .get(id)
                .ok_or_else(|| Self::not_found(id))?
                .exit
                .subscribe()
        };

        let code = match rx.wait_for(|code| code.is_some()).await {
            Ok(code) => code.unwrap_or(KILLED),
            Err(_) => KILLED,
        };
        Ok(code)
    }

    async fn logs(
        &self,
        id: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<LineStream, ContainerError> {
        let state = self.record(format!("logs {}", id));
        let container = state.containers.get(id).ok_or_else(|| Self::not_found(id))?;

        let mut output = container.behaviour.output();
        if let Some(n) = tail {
            let skip = output.len().saturating_sub(n as usize);
            output.drain(..skip);
        }
        let history = futures_util::stream::iter(lines(output));

        if !follow {
            return Ok(Box::pin(history));
        }

        let mut rx = container.exit.subscribe();
        let until_exit = futures_util::stream::once(async move {
            let _ = rx.wait_for(|code| code.is_some()).await;
        })
        .filter_map(|()| futures_util::future::ready(None));
        Ok(Box::pin(history.chain(until_exit)))
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        let state = self.record(format!("stop {}", id));
        state
            .containers
            .get(id)
            .ok_or_else(|| Self::not_found(id))?
            .kill();
        Ok(())
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<(), ContainerError> {
        let mut state = self.record(format!("remove {}", id));
        let container = state.containers.remove(id).ok_or_else(|| Self::not_found(id))?;
        container.kill();
        Ok(())
    }

    async fn restart(&self, id: &str) -> Result<(), ContainerError> {
        let state = self.record(format!("restart {}", id));
        state
            .containers
            .get(id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn running_count(&self) -> Result<u32, ContainerError> {
        Ok(self.running() as u32)
    }
}

/// Records everything a step reports
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, String)>>,
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, status)| status.clone())
            .collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl StepSink for RecordingSink {
    fn container_event(&self, container_id: &str, status: &str, _message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((container_id.to_string(), status.to_string()));
    }

    fn log_line(&self, _container_id: &str, line: &LogLine) {
        self.lines.lock().unwrap().push(line.text.clone());
    }
}

// =============================================================================
// Controller link
// =============================================================================

#[derive(Default)]
struct LinkState {
    registrations: Vec<RegisterRequest>,
    heartbeats: Vec<String>,
    forwarded: Vec<Event>,
    unreachable_registers: u32,
    reject_registers: bool,
    unreachable_heartbeats: u32,
    rejected_heartbeats: u32,
    sessions: u32,
}

/// Controller that accepts everything unless told otherwise
#[derive(Default)]
pub struct FakeLink {
    state: Mutex<LinkState>,
}

impl FakeLink {
    fn state(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.state.lock().unwrap()
    }

    /// The next `count` registrations fail as if the controller were down
    pub fn fail_registers(&self, count: u32) {
        self.state().unreachable_registers = count;
    }

    pub fn reject_registers(&self, reject: bool) {
        self.state().reject_registers = reject;
    }

    pub fn fail_heartbeats(&self, count: u32) {
        self.state().unreachable_heartbeats = count;
    }

    /// The next `count` heartbeats are answered with `success = false`
    pub fn reject_heartbeats(&self, count: u32) {
        self.state().rejected_heartbeats = count;
    }

    pub fn registrations(&self) -> Vec<RegisterRequest> {
        self.state().registrations.clone()
    }

    /// Session ids sent with each heartbeat
    pub fn heartbeats(&self) -> Vec<String> {
        self.state().heartbeats.clone()
    }

    pub fn forwarded(&self) -> Vec<Event> {
        self.state().forwarded.clone()
    }
}

#[async_trait]
impl ControllerLink for FakeLink {
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        let mut state = self.state();
        state.registrations.push(req.clone());

        if state.unreachable_registers > 0 {
            state.unreachable_registers -= 1;
            return Err(ClientError::api_error(503, "controller unavailable"));
        }
        if state.reject_registers {
            return Ok(RegisterResponse {
                session_id: String::new(),
                success: false,
                message: "rejected".to_string(),
            });
        }

        state.sessions += 1;
        Ok(RegisterResponse {
            session_id: format!("session-{}", state.sessions),
            success: true,
            message: String::new(),
        })
    }

    async fn heartbeat(
        &self,
        _node_id: &str,
        session_id: &str,
        _metrics: Option<NodeMetrics>,
    ) -> Result<HeartbeatResponse, ClientError> {
        let mut state = self.state();
        state.heartbeats.push(session_id.to_string());

        if state.unreachable_heartbeats > 0 {
            state.unreachable_heartbeats -= 1;
            return Err(ClientError::api_error(503, "controller unavailable"));
        }
        let success = if state.rejected_heartbeats > 0 {
            state.rejected_heartbeats -= 1;
            false
        } else {
            true
        };

        Ok(HeartbeatResponse {
            success,
            server_time: Utc::now(),
        })
    }

    async fn forward_events(&self, _node_id: &str, events: Vec<Event>) -> Result<(), ClientError> {
        self.state().forwarded.extend(events);
        Ok(())
    }
}

// =============================================================================
// Metrics
// =============================================================================

#[derive(Default)]
pub struct FakeMetrics {
    samples: AtomicU32,
}

impl FakeMetrics {
    pub fn samples(&self) -> u32 {
        self.samples.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn collect(&self) -> anyhow::Result<NodeMetrics> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        Ok(NodeMetrics {
            cpu_usage: 12.5,
            memory_usage: 40.0,
            disk_usage: 0.0,
            load_average: 0.5,
            container_count: 0,
            collected_at: Utc::now(),
        })
    }
}
