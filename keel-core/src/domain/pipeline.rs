//! Pipeline domain types
//!
//! A [`Pipeline`] is an ordered list of steps executed as a unit. Definitions
//! are immutable once accepted; only the associated [`PipelineStatus`] moves,
//! and it only moves along the legal lifecycle edges:
//!
//! ```text
//! pipeline: pending -> running -> {completed | failed | canceled}
//! step:     pending -> running -> {completed | failed | skipped}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Wire name of the only executable step type
pub const STEP_TYPE_CONTAINER: &str = "container";

/// Upper bound for the log bytes retained per step
pub const MAX_STEP_LOG_BYTES: usize = 64 * 1024;

// =============================================================================
// Definitions
// =============================================================================

/// Pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<Step>,
    /// Environment merged into every container step
    #[serde(default)]
    pub envs: HashMap<String, String>,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

/// One unit of work within a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
}

/// Parsed form of [`Step::step_type`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Container,
}

/// Container workload description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub security_opt: Vec<String>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub tmpfs: Vec<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

/// Host path bound into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMapping {
    /// Render as `host:container[:ro]`
    pub fn to_bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.host_path, self.container_path)
        } else {
            format!("{}:{}", self.host_path, self.container_path)
        }
    }
}

/// Resource reservations for a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Number of CPUs, fractional values allowed
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory_bytes: Option<i64>,
}

/// Reasons a pipeline definition is rejected before execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("pipeline id must not be empty")]
    EmptyId,

    #[error("pipeline has no steps")]
    NoSteps,

    #[error("step {index} has an empty name")]
    EmptyStepName { index: usize },

    #[error("step '{step}' has an empty type")]
    EmptyStepType { step: String },

    #[error("step '{step}' has unsupported type '{step_type}'")]
    UnknownStepType { step: String, step_type: String },

    #[error("container step '{step}' has no container spec")]
    MissingContainer { step: String },

    #[error("container step '{step}' has an empty image")]
    EmptyImage { step: String },
}

impl Step {
    /// Parse the step type
    pub fn kind(&self) -> Result<StepKind, ValidationError> {
        match self.step_type.as_str() {
            "" => Err(ValidationError::EmptyStepType {
                step: self.name.clone(),
            }),
            STEP_TYPE_CONTAINER => Ok(StepKind::Container),
            other => Err(ValidationError::UnknownStepType {
                step: self.name.clone(),
                step_type: other.to_string(),
            }),
        }
    }
}

impl Pipeline {
    /// Check that the pipeline can be executed
    ///
    /// # Returns
    /// The first problem found, if any
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.steps.is_empty() {
            return Err(ValidationError::NoSteps);
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ValidationError::EmptyStepName { index });
            }
            match step.kind()? {
                StepKind::Container => {
                    let spec = step
                        .container
                        .as_ref()
                        .ok_or_else(|| ValidationError::MissingContainer {
                            step: step.name.clone(),
                        })?;
                    if spec.image.trim().is_empty() {
                        return Err(ValidationError::EmptyImage {
                            step: step.name.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Lifecycle states
// =============================================================================

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed | Self::Failed | Self::Canceled)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Pending => write!(f, "pending"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Completed => write!(f, "completed"),
            PipelineState::Failed => write!(f, "failed"),
            PipelineState::Canceled => write!(f, "canceled"),
        }
    }
}

/// Step lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn can_transition_to(self, next: StepState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed | Self::Failed | Self::Skipped)
        )
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Pending => write!(f, "pending"),
            StepState::Running => write!(f, "running"),
            StepState::Completed => write!(f, "completed"),
            StepState::Failed => write!(f, "failed"),
            StepState::Skipped => write!(f, "skipped"),
        }
    }
}

/// An attempted move along an edge the lifecycle does not allow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal pipeline transition {from} -> {to}")]
    Pipeline {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("illegal transition {from} -> {to} for step {index}")]
    Step {
        index: usize,
        from: StepState,
        to: StepState,
    },

    #[error("step index {index} out of range ({total} steps)")]
    StepOutOfRange { index: usize, total: usize },

    #[error("step index cannot move back from {current} to {requested}")]
    IndexRegression { current: usize, requested: usize },
}

// =============================================================================
// Status
// =============================================================================

/// Per-step execution status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub name: String,
    pub state: StepState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default, with = "lossy_utf8")]
    pub logs: Vec<u8>,
    pub progress: f32,
}

impl StepStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StepState::Pending,
            start_time: None,
            end_time: None,
            error: None,
            logs: Vec::new(),
            progress: 0.0,
        }
    }

    fn transition(&mut self, index: usize, to: StepState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError::Step {
                index,
                from: self.state,
                to,
            });
        }

        let now = Utc::now();
        match to {
            StepState::Running => self.start_time = Some(now),
            StepState::Completed => {
                self.end_time = Some(now);
                self.progress = 1.0;
            }
            _ => self.end_time = Some(now),
        }
        self.state = to;
        Ok(())
    }

    /// Append log output, dropping the oldest bytes past the cap
    pub fn append_logs(&mut self, bytes: &[u8]) {
        self.logs.extend_from_slice(bytes);
        if self.logs.len() > MAX_STEP_LOG_BYTES {
            let excess = self.logs.len() - MAX_STEP_LOG_BYTES;
            self.logs.drain(..excess);
        }
    }
}

/// Pipeline execution status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub pipeline_id: String,
    pub state: PipelineState,
    pub current_step_index: usize,
    pub total_steps: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub steps: Vec<StepStatus>,
}

impl PipelineStatus {
    /// Build a pending status with one pending step per pipeline step
    pub fn new(pipeline: &Pipeline) -> Self {
        Self {
            pipeline_id: pipeline.id.clone(),
            state: PipelineState::Pending,
            current_step_index: 0,
            total_steps: pipeline.steps.len(),
            start_time: None,
            end_time: None,
            error_message: None,
            steps: pipeline
                .steps
                .iter()
                .map(|s| StepStatus::new(s.name.clone()))
                .collect(),
        }
    }

    /// Move the pipeline to `to`, stamping start/end times
    pub fn transition(&mut self, to: PipelineState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError::Pipeline {
                from: self.state,
                to,
            });
        }

        match to {
            PipelineState::Running => self.start_time = Some(Utc::now()),
            _ => self.end_time = Some(Utc::now()),
        }
        self.state = to;
        Ok(())
    }

    /// Terminate the pipeline in `to` with an error message
    pub fn finish_with_error(
        &mut self,
        to: PipelineState,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(to)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Set the current step index; it never moves backwards
    pub fn advance_to(&mut self, index: usize) -> Result<(), TransitionError> {
        if index < self.current_step_index {
            return Err(TransitionError::IndexRegression {
                current: self.current_step_index,
                requested: index,
            });
        }
        self.current_step_index = index;
        Ok(())
    }

    pub fn step(&self, index: usize) -> Option<&StepStatus> {
        self.steps.get(index)
    }

    pub fn step_mut(&mut self, index: usize) -> Result<&mut StepStatus, TransitionError> {
        let total = self.steps.len();
        self.steps
            .get_mut(index)
            .ok_or(TransitionError::StepOutOfRange { index, total })
    }

    /// Move step `index` to `to`
    pub fn transition_step(&mut self, index: usize, to: StepState) -> Result<(), TransitionError> {
        self.step_mut(index)?.transition(index, to)
    }

    /// Mark step `index` failed and record the error
    pub fn fail_step(
        &mut self,
        index: usize,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let step = self.step_mut(index)?;
        step.transition(index, StepState::Failed)?;
        step.error = Some(message.into());
        Ok(())
    }

    /// Fraction of steps completed, 0.0 to 1.0
    pub fn progress(&self) -> f32 {
        if self.total_steps == 0 {
            return 0.0;
        }
        let done = self
            .steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .count();
        done as f32 / self.total_steps as f32
    }
}

mod lossy_utf8 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}
