//! photomesh-gen library interface
//!
//! Turns up to five photographs of an object into a textured 3-D mesh:
//! validation, optional remote background removal, GPU reconstruction and
//! result assembly, exposed over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult, PipelineError};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use photomesh_common::config::TomlConfig;
use photomesh_common::events::EventBus;
use services::{
    BackgroundRemovalStage, GpuGate, ImageValidator, PhotoroomClient, PipelineOrchestrator,
    ReconstructionStage, ResultAssembler, TripoSrModel, WorkDirectoryManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Route prefix retained artifacts are served under
pub const DOWNLOAD_PREFIX: &str = "/download";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Removal credential used when a request brings none (ENV or TOML)
    pub default_credential: Option<String>,
    /// Images served by `/demo`
    pub demo_image_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(orchestrator: PipelineOrchestrator, event_bus: EventBus) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            event_bus,
            default_credential: None,
            demo_image_dir: None,
            max_upload_bytes: 64 * 1024 * 1024,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_default_credential(mut self, credential: Option<String>) -> Self {
        self.default_credential = credential;
        self
    }

    pub fn with_demo_image_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.demo_image_dir = dir;
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// Remember the most recent failure for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Wire the production pipeline from configuration
pub fn build_orchestrator(
    toml_config: &TomlConfig,
    work_root: PathBuf,
    search_paths: Vec<PathBuf>,
    event_bus: EventBus,
) -> Result<PipelineOrchestrator, ApiError> {
    let removal_config = &toml_config.background_removal;
    let remover = PhotoroomClient::new(removal_config, &photomesh_common::config::get_user_agent())?;

    let recon_config = &toml_config.reconstruction;
    let model = TripoSrModel::from_config(recon_config, search_paths);
    let reconstruction = ReconstructionStage::new(
        Arc::new(model),
        Arc::new(GpuGate::new()),
        Duration::from_secs(recon_config.timeout_secs),
    )
    .with_multi_view(recon_config.multi_view)
    .with_preferred_format(config::preferred_mesh_format(toml_config));

    Ok(PipelineOrchestrator::new(
        ImageValidator::new(toml_config.max_images),
        WorkDirectoryManager::new(work_root, toml_config.work_directory.retention),
        BackgroundRemovalStage::new(Arc::new(remover), removal_config.max_concurrent),
        reconstruction,
        ResultAssembler::new(DOWNLOAD_PREFIX),
        event_bus,
    ))
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let body_limit = state.max_upload_bytes;

    Router::new()
        .merge(api::health_routes())
        .merge(api::generate_routes())
        .merge(api::download_routes())
        .merge(api::demo_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        // Viewer is served from another origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
