//! Status and health endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// GET / response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub service: String,
    /// Reconstruction model name
    pub model: String,
    /// Model runtime found on disk
    pub runtime_available: bool,
    /// An inference currently holds the GPU
    pub gpu_busy: bool,
    pub max_images: usize,
}

/// GET /health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the model runtime is missing
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub runtime_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_error: Option<String>,
    /// Warm-up done; absent while the GPU is busy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_warmed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferences: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /
pub async fn service_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let reconstruction = state.orchestrator.reconstruction();

    Json(StatusResponse {
        status: "running".to_string(),
        service: "photomesh-gen".to_string(),
        model: reconstruction.model_name().to_string(),
        runtime_available: reconstruction.check_runtime().is_ok(),
        gpu_busy: reconstruction.gate().is_busy(),
        max_images: state.orchestrator.max_images(),
    })
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let reconstruction = state.orchestrator.reconstruction();
    let runtime_error = reconstruction.check_runtime().err().map(|e| e.to_string());
    let gate = reconstruction.gate();

    Json(HealthResponse {
        status: if runtime_error.is_none() { "ok" } else { "degraded" }.to_string(),
        module: "photomesh-gen".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        runtime_available: runtime_error.is_none(),
        runtime_error,
        model_warmed: gate.is_warmed(),
        inferences: gate.inference_count(),
        last_error: state.last_error.read().await.clone(),
    })
}

/// Build status and health routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(service_status))
        .route("/health", get(health_check))
}
