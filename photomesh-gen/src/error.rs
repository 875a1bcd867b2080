//! Error types for photomesh-gen
//!
//! Two layers: [`PipelineError`] is the request-level taxonomy every stage
//! failure is folded into, and [`ApiError`] covers the HTTP boundary
//! (multipart decoding, downloads, demo setup).

use crate::models::ErrorKind;
use crate::services::background_removal::BackgroundRemovalError;
use crate::services::reconstruction::ReconstructionError;
use crate::services::validator::ValidationError;
use crate::services::work_directory::WorkDirectoryError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Request-level failure
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad or unusable images (400)
    #[error("Invalid input: {0}")]
    Input(String),

    /// Filesystem or similar local resource failure (500)
    #[error("Resource error: {0}")]
    Resource(String),

    /// Model ran but did not produce a mesh (500, never retried)
    #[error("Reconstruction failed: {0}")]
    Reconstruction(String),

    /// Deployment problem, e.g. model runtime missing (503)
    #[error("Service misconfigured: {0}")]
    Configuration(String),

    /// Client went away before completion (408)
    #[error("Request cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Input(_) => ErrorKind::Input,
            PipelineError::Resource(_) => ErrorKind::Resource,
            PipelineError::Reconstruction(_) => ErrorKind::Reconstruction,
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Detail without the category prefix
    pub fn detail(&self) -> String {
        match self {
            PipelineError::Input(detail)
            | PipelineError::Resource(detail)
            | PipelineError::Reconstruction(detail)
            | PipelineError::Configuration(detail) => detail.clone(),
            PipelineError::Cancelled => "request cancelled".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        status_for_kind(self.kind())
    }
}

/// HTTP status for a failed request of the given category
pub fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Input => StatusCode::BAD_REQUEST,
        ErrorKind::Resource | ErrorKind::Reconstruction => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Configuration => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
    }
}

impl From<ValidationError> for PipelineError {
    fn from(err: ValidationError) -> Self {
        PipelineError::Input(err.to_string())
    }
}

impl From<WorkDirectoryError> for PipelineError {
    fn from(err: WorkDirectoryError) -> Self {
        PipelineError::Resource(err.to_string())
    }
}

impl From<ReconstructionError> for PipelineError {
    fn from(err: ReconstructionError) -> Self {
        match err {
            ReconstructionError::Cancelled => PipelineError::Cancelled,
            ReconstructionError::Io(e) => PipelineError::Resource(e.to_string()),
            e if e.is_configuration() => PipelineError::Configuration(e.to_string()),
            e if e.is_input() => PipelineError::Input(e.to_string()),
            e => PipelineError::Reconstruction(e.to_string()),
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Feature not configured on this server (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Background removal client could not be built
    #[error("Background removal error: {0}")]
    BackgroundRemoval(#[from] BackgroundRemovalError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::BackgroundRemoval(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "BACKGROUND_REMOVAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
