//! Pipeline DTOs
//!
//! Data transfer objects for dispatching, querying and canceling pipelines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::pipeline::Pipeline;

/// Request to execute a pipeline on a node
///
/// `envs` and `args` are merged over the pipeline's own values before
/// execution, request values winning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePipelineRequest {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub pipeline_id: String,
    pub pipeline: Pipeline,
    #[serde(default)]
    pub envs: HashMap<String, String>,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl ExecutePipelineRequest {
    /// The pipeline to run, with request overrides applied
    pub fn into_pipeline(self) -> Pipeline {
        let mut pipeline = self.pipeline;
        if !self.pipeline_id.is_empty() {
            pipeline.id = self.pipeline_id;
        }
        pipeline.envs.extend(self.envs);
        pipeline.args.extend(self.args);
        pipeline
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePipelineResponse {
    pub execution_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelPipelineRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPipelineResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_overrides_pipeline_values() {
        let pipeline = Pipeline {
            id: "p".to_string(),
            name: "p".to_string(),
            description: None,
            steps: vec![],
            envs: HashMap::from([
                ("MODE".to_string(), "debug".to_string()),
                ("KEEP".to_string(), "1".to_string()),
            ]),
            args: HashMap::new(),
        };
        let request = ExecutePipelineRequest {
            node_id: "n".to_string(),
            pipeline_id: "p-2".to_string(),
            pipeline,
            envs: HashMap::from([("MODE".to_string(), "release".to_string())]),
            args: HashMap::from([("target".to_string(), "x86_64".to_string())]),
        };

        let merged = request.into_pipeline();
        assert_eq!(merged.id, "p-2");
        assert_eq!(merged.envs["MODE"], "release");
        assert_eq!(merged.envs["KEEP"], "1");
        assert_eq!(merged.args["target"], "x86_64");
    }
}
