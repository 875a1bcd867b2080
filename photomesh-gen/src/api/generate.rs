//! POST /generate
//!
//! Multipart fields:
//! - `files` (repeated): the photographs, in order
//! - `photoroom_api_key` (optional): background-removal credential
//! - `include_files` (optional): embed artifacts as base64 in the response

use crate::config::request_credential;
use crate::error::{status_for_kind, ApiError, ApiResult};
use crate::models::{ImageAsset, PipelineResult, ReconstructionRequest};
use crate::AppState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Decoded multipart upload
#[derive(Debug, Default)]
pub struct GenerateForm {
    pub images: Vec<ImageAsset>,
    pub api_key: Option<String>,
    pub include_files: bool,
}

/// Read every part of the upload; unknown fields are skipped
pub async fn parse_generate_form(mut multipart: Multipart) -> ApiResult<GenerateForm> {
    let mut form = GenerateForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "file" => {
                let index = form.images.len();
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("image_{}", index));
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", filename, e)))?;
                form.images
                    .push(ImageAsset::new(index, filename, content_type, bytes.to_vec()));
            }
            "photoroom_api_key" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid photoroom_api_key: {}", e)))?;
                form.api_key = Some(value);
            }
            "include_files" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid include_files: {}", e)))?;
                form.include_files = parse_bool(&value).ok_or_else(|| {
                    ApiError::BadRequest(format!("include_files must be a boolean, got '{}'", value))
                })?;
            }
            other => debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    Ok(form)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Run a request on its own task and map the outcome to a response
///
/// If the client disconnects, this future is dropped and the guard cancels
/// the pipeline; the spawned task still finishes its cleanup.
pub async fn run_pipeline(
    state: &AppState,
    request: ReconstructionRequest,
) -> ApiResult<(StatusCode, Json<PipelineResult>)> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let orchestrator = state.orchestrator.clone();
    let result = tokio::spawn(async move { orchestrator.run(request, cancel).await })
        .await
        .map_err(|e| ApiError::Internal(format!("Pipeline task failed: {}", e)))?;
    guard.disarm();

    let status = match result.error_kind() {
        None => StatusCode::OK,
        Some(kind) => {
            state
                .record_error(format!("{}: {}", result.request_id, result.message))
                .await;
            status_for_kind(kind)
        }
    };

    Ok((status, Json(result)))
}

/// POST /generate
pub async fn generate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<PipelineResult>)> {
    let form = parse_generate_form(multipart).await?;
    let credential = request_credential(form.api_key.as_deref(), state.default_credential.as_deref());
    let request = ReconstructionRequest::new(form.images, credential, form.include_files);

    info!(
        request_id = %request.request_id(),
        images = request.images().len(),
        "Generate request received"
    );

    run_pipeline(&state, request).await
}

/// Build generation routes
pub fn generate_routes() -> Router<AppState> {
    Router::new().route("/generate", post(generate))
}
