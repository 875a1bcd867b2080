//! GET /download/{request_id}/{path}
//!
//! Streams an artifact from a retained work directory. Paths are resolved
//! inside the request's `output/` only.

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// GET /download/:request_id/*path
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((request_id, relative_path)): Path<(Uuid, String)>,
) -> ApiResult<Response> {
    let relative_path = relative_path.trim_start_matches('/');
    let path = state
        .orchestrator
        .work_directories()
        .resolve_artifact(request_id, relative_path)
        .ok_or_else(|| ApiError::NotFound(format!("{}/{}", request_id, relative_path)))?;

    let file = tokio::fs::File::open(&path).await?;
    let length = file.metadata().await?.len();
    debug!(request_id = %request_id, path = %relative_path, bytes = length, "Serving artifact");

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&filename))),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(length)),
        ],
        body,
    )
        .into_response())
}

fn content_type_for(filename: &str) -> &'static str {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "obj" | "mtl" => "text/plain; charset=utf-8",
        "glb" => "model/gltf-binary",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Build download routes
pub fn download_routes() -> Router<AppState> {
    Router::new().route("/download/:request_id/*path", get(download_artifact))
}
