//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use keel_client::ClientError;

use crate::fleet::FleetError;

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
            ApiError::Unavailable(msg) => {
                tracing::warn!("Agent unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::NotRegistered(_) => ApiError::NotFound(err.to_string()),
            FleetError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            // Agent answers keep their status; transport failures mean the
            // node cannot be reached right now
            FleetError::Agent { source, .. } => match source {
                ClientError::ApiError { status: 404, message } => ApiError::NotFound(message),
                ClientError::ApiError { status: 400, message } => ApiError::BadRequest(message),
                ClientError::ApiError { status: 409, message } => ApiError::Conflict(message),
                other => ApiError::Unavailable(other.to_string()),
            },
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
