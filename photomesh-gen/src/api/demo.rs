//! GET /demo
//!
//! Runs the pipeline on sample images from the configured demo directory,
//! without background removal.

use crate::api::generate::run_pipeline;
use crate::error::{ApiError, ApiResult};
use crate::models::{ImageAsset, ImageKind, PipelineResult, ReconstructionRequest};
use crate::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::path::Path;
use tracing::info;

/// Load up to `max_images` accepted images from `dir`, ordered by filename
pub async fn load_demo_images(dir: &Path, max_images: usize) -> ApiResult<Vec<ImageAsset>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if let Some(kind) = ImageKind::from_filename(&filename) {
            if entry.file_type().await?.is_file() {
                candidates.push((filename, kind, entry.path()));
            }
        }
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let mut images = Vec::new();
    for (index, (filename, kind, path)) in candidates.into_iter().take(max_images).enumerate() {
        let bytes = tokio::fs::read(&path).await?;
        images.push(ImageAsset::new(
            index,
            filename,
            Some(kind.mime_type().to_string()),
            bytes,
        ));
    }

    Ok(images)
}

/// GET /demo
pub async fn run_demo(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<PipelineResult>)> {
    let dir = state
        .demo_image_dir
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("No demo image directory configured".to_string()))?;

    let images = load_demo_images(&dir, state.orchestrator.max_images()).await?;
    if images.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No demo images in {}",
            dir.display()
        )));
    }

    let request = ReconstructionRequest::new(images, None, false);
    info!(
        request_id = %request.request_id(),
        images = request.images().len(),
        "Demo request started"
    );

    run_pipeline(&state, request).await
}

/// Build demo routes
pub fn demo_routes() -> Router<AppState> {
    Router::new().route("/demo", get(run_demo))
}
