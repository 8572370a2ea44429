//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::agent::AgentError;
use crate::container::ContainerError;
use crate::executor::ExecutorError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let message = err.to_string();
        match err {
            AgentError::ExecutionNotFound(_) => ApiError::NotFound(message),
            AgentError::Executor(e) => match e {
                ExecutorError::NotFound(_) => ApiError::NotFound(message),
                ExecutorError::Invalid(_) => ApiError::BadRequest(message),
                ExecutorError::AlreadyRunning(_) | ExecutorError::NotRunning { .. } => {
                    ApiError::Conflict(message)
                }
                ExecutorError::ShutDown => ApiError::Unavailable(message),
                ExecutorError::Transition(_) => ApiError::InternalError(message),
            },
            AgentError::Container(e) => match e {
                ContainerError::NotFound(_) => ApiError::NotFound(message),
                ContainerError::InvalidStep(_) => ApiError::BadRequest(message),
                _ => ApiError::InternalError(message),
            },
            AgentError::AlreadyRunning => ApiError::Conflict(message),
            AgentError::Rejected(_)
            | AgentError::Registration(_)
            | AgentError::Controller(_) => ApiError::Unavailable(message),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
