//! In-memory doubles for the controller's seams

use async_trait::async_trait;
use chrono::Utc;
use keel_client::{ClientError, JsonStream};
use keel_core::domain::log::{LogEntry, LogLevel, LogSource};
use keel_core::domain::node::{NodeInfo, NodeMetrics, NodeState};
use keel_core::domain::pipeline::{
    ContainerSpec, Pipeline, PipelineStatus, STEP_TYPE_CONTAINER, Step,
};
use keel_core::dto::container::{ContainerAction, ContainerActionResponse, LogQuery};
use keel_core::dto::node::RegisterRequest;
use keel_core::dto::pipeline::{
    CancelPipelineResponse, ExecutePipelineRequest, ExecutePipelineResponse,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::directory::{DirectoryError, NodeDirectory, NodeRecord};
use crate::gateway::AgentGateway;

pub fn register_request(node_id: &str) -> RegisterRequest {
    RegisterRequest {
        node_id: node_id.to_string(),
        hostname: format!("{}.local", node_id),
        agent_url: format!("http://{}:7070", node_id),
        node_info: NodeInfo {
            hostname: format!("{}.local", node_id),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            ..Default::default()
        },
    }
}

pub fn pipeline(id: &str, steps: usize) -> Pipeline {
    Pipeline {
        id: id.to_string(),
        name: format!("{}-name", id),
        description: None,
        steps: (0..steps)
            .map(|i| Step {
                name: format!("s{}", i),
                step_type: STEP_TYPE_CONTAINER.to_string(),
                container: Some(ContainerSpec {
                    image: "alpine".to_string(),
                    ..Default::default()
                }),
            })
            .collect(),
        envs: HashMap::new(),
        args: HashMap::new(),
    }
}

pub fn metrics(cpu: f32) -> NodeMetrics {
    NodeMetrics {
        cpu_usage: cpu,
        memory_usage: 40.0,
        disk_usage: 0.0,
        load_average: 0.5,
        container_count: 1,
        collected_at: Utc::now(),
    }
}

// =============================================================================
// Agent gateway
// =============================================================================

/// Records every call and answers like a healthy agent
///
/// Pipelines it accepted are reported back as pending; anything else is a
/// 404. With `set_unreachable(true)` every call fails with a 503.
#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<Vec<String>>,
    pipelines: Mutex<HashMap<String, PipelineStatus>>,
    unreachable: AtomicBool,
}

impl FakeGateway {
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(call);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ClientError::api_error(503, "agent unreachable"));
        }
        Ok(())
    }

    fn log_stream(source_id: &str) -> JsonStream<LogEntry> {
        let entries = vec![
            Ok(LogEntry::new(
                LogSource::Container,
                source_id,
                LogLevel::Info,
                "first",
            )),
            Ok(LogEntry::new(
                LogSource::Container,
                source_id,
                LogLevel::Info,
                "second",
            )),
            Err(ClientError::ParseError("connection reset".to_string())),
            Ok(LogEntry::new(
                LogSource::Container,
                source_id,
                LogLevel::Info,
                "never delivered",
            )),
        ];
        Box::pin(futures_util::stream::iter(entries))
    }
}

#[async_trait]
impl AgentGateway for FakeGateway {
    async fn execute_pipeline(
        &self,
        agent_url: &str,
        req: &ExecutePipelineRequest,
    ) -> Result<ExecutePipelineResponse, ClientError> {
        self.record(format!("execute {} {}", agent_url, req.pipeline.id))?;
        self.pipelines.lock().unwrap().insert(
            req.pipeline.id.clone(),
            PipelineStatus::new(&req.pipeline),
        );
        Ok(ExecutePipelineResponse {
            execution_id: req.pipeline.id.clone(),
            accepted: true,
            message: "accepted".to_string(),
        })
    }

    async fn pipeline_status(
        &self,
        agent_url: &str,
        execution_id: &str,
    ) -> Result<PipelineStatus, ClientError> {
        self.record(format!("status {} {}", agent_url, execution_id))?;
        self.pipelines
            .lock()
            .unwrap()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| {
                ClientError::api_error(404, format!("execution {} not found", execution_id))
            })
    }

    async fn cancel_pipeline(
        &self,
        agent_url: &str,
        execution_id: &str,
        reason: Option<String>,
    ) -> Result<CancelPipelineResponse, ClientError> {
        self.record(format!(
            "cancel {} {} {}",
            agent_url,
            execution_id,
            reason.unwrap_or_default()
        ))?;
        Ok(CancelPipelineResponse {
            success: true,
            message: format!("pipeline {} canceled", execution_id),
        })
    }

    async fn container_action(
        &self,
        agent_url: &str,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerActionResponse, ClientError> {
        self.record(format!(
            "{} {} {}",
            action.as_str(),
            agent_url,
            container_id
        ))?;
        Ok(ContainerActionResponse {
            success: true,
            message: format!("container {} {}", container_id, action.as_str()),
        })
    }

    async fn stream_node_logs(
        &self,
        agent_url: &str,
    ) -> Result<JsonStream<LogEntry>, ClientError> {
        self.record(format!("logs {}", agent_url))?;
        Ok(Self::log_stream("node"))
    }

    async fn stream_container_logs(
        &self,
        agent_url: &str,
        container_id: &str,
        query: &LogQuery,
    ) -> Result<JsonStream<LogEntry>, ClientError> {
        self.record(format!(
            "container-logs {} {} tail={:?}",
            agent_url, container_id, query.tail
        ))?;
        Ok(Self::log_stream(container_id))
    }
}

// =============================================================================
// Node directory
// =============================================================================

/// Directory whose every call fails
#[derive(Default)]
pub struct BrokenDirectory {
    pub attempts: Mutex<u32>,
}

impl BrokenDirectory {
    fn fail(&self) -> DirectoryError {
        *self.attempts.lock().unwrap() += 1;
        DirectoryError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl NodeDirectory for BrokenDirectory {
    async fn get(&self, _node_id: &str) -> Result<Option<NodeRecord>, DirectoryError> {
        Err(self.fail())
    }

    async fn update_state(&self, _node_id: &str, _state: NodeState) -> Result<(), DirectoryError> {
        Err(self.fail())
    }

    async fn update_metrics(
        &self,
        _node_id: &str,
        _metrics: &NodeMetrics,
    ) -> Result<(), DirectoryError> {
        Err(self.fail())
    }

    async fn update_resources(
        &self,
        _node_id: &str,
        _resources: HashMap<String, String>,
    ) -> Result<(), DirectoryError> {
        Err(self.fail())
    }

    async fn update_online_status(
        &self,
        _node_id: &str,
        _online: bool,
    ) -> Result<(), DirectoryError> {
        Err(self.fail())
    }
}
