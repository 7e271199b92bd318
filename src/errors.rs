//! Error taxonomy for the pipeline core plus the HTTP-facing wrapper.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::services::blob_store::StoreError;
use crate::services::job_queue::QueueError;
use crate::services::recognizer::RecognizerError;

/// Failures crossing a pipeline component boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Blob read/write/list failures.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Recognition/compression/thumbnail/frame engine failures.
    #[error("external service: {0}")]
    External(String),
    /// Missing or malformed `source`/`refs` tags encountered during
    /// copy/remove.
    #[error("tag consistency: {0}")]
    TagConsistency(String),
    /// Unsupported file kind, malformed sync path, bad request data.
    #[error("validation: {0}")]
    Validation(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl PipelineError {
    pub fn external(err: impl fmt::Display) -> Self {
        Self::External(err.to_string())
    }

    pub fn tag_consistency(msg: impl Into<String>) -> Self {
        Self::TagConsistency(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// A lightweight wrapper for handler errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::BucketNotFound(_) | StoreError::ObjectNotFound { .. } => {
                AppError::not_found(err.to_string())
            }
            StoreError::InvalidBucketName { .. } | StoreError::InvalidObjectKey => {
                AppError::bad_request(err.to_string())
            }
            _ => AppError::internal(err.to_string()),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Store(store) => store.into(),
            PipelineError::Validation(msg) => AppError::bad_request(msg),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<RecognizerError> for AppError {
    fn from(err: RecognizerError) -> Self {
        AppError::new(StatusCode::BAD_GATEWAY, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
