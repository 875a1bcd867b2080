//! Reconstruction stage
//!
//! Turns the usable images of a request into mesh artifacts. The model is a
//! process-wide exclusive resource: [`GpuGate`] serializes inference (and the
//! one-time warm-up) while every other stage of concurrent requests proceeds
//! in parallel.

use crate::models::{Artifact, ArtifactKind, MeshFormat, ReconstructionArtifactSet};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Reconstruction errors
#[derive(Debug, Error)]
pub enum ReconstructionError {
    /// Model runtime not present at any search location
    #[error("Reconstruction runtime not found (searched: {searched})")]
    RuntimeNotFound { searched: String },

    /// Interpreter or helper binary cannot be started
    #[error("Reconstruction interpreter unavailable: {0}")]
    InterpreterUnavailable(String),

    /// None of the supplied images could be loaded
    #[error("No usable images to reconstruct from")]
    NoUsableImages,

    #[error("Model process failed to run: {0}")]
    Execution(String),

    #[error("Model exited with {status}: {stderr_tail}")]
    ProcessFailed { status: String, stderr_tail: String },

    #[error("Reconstruction timed out after {0:?}")]
    Timeout(Duration),

    #[error("No mesh file (obj/ply/glb) produced in {0}")]
    NoMeshProduced(PathBuf),

    #[error("Reconstruction cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ReconstructionError {
    /// Deployment problem rather than a model failure
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReconstructionError::RuntimeNotFound { .. } | ReconstructionError::InterpreterUnavailable(_)
        )
    }

    /// Caused by the request's images
    pub fn is_input(&self) -> bool {
        matches!(self, ReconstructionError::NoUsableImages)
    }
}

/// Where a model's runtime lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLocation {
    pub root: PathBuf,
    pub entrypoint: PathBuf,
}

/// Image-to-mesh capability
#[async_trait]
pub trait ReconstructionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether one call can condition on several views
    fn supports_multi_view(&self) -> bool;

    /// Locate the runtime; fails with a configuration error when absent
    fn resolve_runtime(&self) -> Result<RuntimeLocation, ReconstructionError>;

    /// One-time preparation, run under the GPU lock before the first inference
    async fn warm_up(&self, runtime: &RuntimeLocation) -> Result<(), ReconstructionError>;

    /// Run inference, writing mesh and side files under `output_dir`
    async fn infer(
        &self,
        runtime: &RuntimeLocation,
        images: &[PathBuf],
        output_dir: &Path,
    ) -> Result<(), ReconstructionError>;
}

#[derive(Debug, Default)]
struct GpuSlot {
    warmed: bool,
    inferences: u64,
}

/// Process-wide exclusive access to the reconstruction model
#[derive(Debug, Default)]
pub struct GpuGate {
    slot: Mutex<GpuSlot>,
}

impl GpuGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// An inference (or warm-up) currently holds the gate
    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Completed inferences, None while busy
    pub fn inference_count(&self) -> Option<u64> {
        self.slot.try_lock().ok().map(|slot| slot.inferences)
    }

    /// Warm-up has completed, None while busy
    pub fn is_warmed(&self) -> Option<bool> {
        self.slot.try_lock().ok().map(|slot| slot.warmed)
    }
}

/// Drives one reconstruction per request through the shared gate
#[derive(Clone)]
pub struct ReconstructionStage {
    model: Arc<dyn ReconstructionModel>,
    gate: Arc<GpuGate>,
    timeout: Duration,
    multi_view: bool,
    preferred_format: Option<MeshFormat>,
}

impl ReconstructionStage {
    pub fn new(model: Arc<dyn ReconstructionModel>, gate: Arc<GpuGate>, timeout: Duration) -> Self {
        Self {
            model,
            gate,
            timeout,
            multi_view: true,
            preferred_format: None,
        }
    }

    /// Allow or forbid batching several views into one call
    pub fn with_multi_view(mut self, multi_view: bool) -> Self {
        self.multi_view = multi_view;
        self
    }

    /// Mesh format picked as primary when several are produced
    pub fn with_preferred_format(mut self, format: Option<MeshFormat>) -> Self {
        self.preferred_format = format;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn gate(&self) -> &Arc<GpuGate> {
        &self.gate
    }

    /// Resolve the runtime before any per-request work starts
    pub fn check_runtime(&self) -> Result<RuntimeLocation, ReconstructionError> {
        self.model.resolve_runtime()
    }

    /// Run the model on `image_paths` and enumerate what it produced
    ///
    /// Cancellation before the gate is acquired returns without touching the
    /// model. Once inference has started it runs to completion and the result
    /// is discarded if the request was cancelled meanwhile.
    pub async fn reconstruct(
        &self,
        runtime: &RuntimeLocation,
        image_paths: &[PathBuf],
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ReconstructionArtifactSet, ReconstructionError> {
        let mut usable = load_usable(image_paths).await;
        if usable.is_empty() {
            return Err(ReconstructionError::NoUsableImages);
        }
        if !(self.multi_view && self.model.supports_multi_view()) {
            usable.truncate(1);
        }

        debug!(
            model = self.model.name(),
            images = usable.len(),
            "Waiting for GPU"
        );

        let mut slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconstructionError::Cancelled),
            slot = self.gate.slot.lock() => slot,
        };

        if !slot.warmed {
            info!(model = self.model.name(), "Warming up reconstruction model");
            tokio::time::timeout(self.timeout, self.model.warm_up(runtime))
                .await
                .map_err(|_| ReconstructionError::Timeout(self.timeout))??;
            slot.warmed = true;
        }

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.model.infer(runtime, &usable, output_dir),
        )
        .await;
        slot.inferences += 1;
        drop(slot);

        match outcome {
            Err(_) => return Err(ReconstructionError::Timeout(self.timeout)),
            Ok(result) => result?,
        }

        info!(
            model = self.model.name(),
            images = usable.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Inference complete"
        );

        if cancel.is_cancelled() {
            return Err(ReconstructionError::Cancelled);
        }

        collect_artifacts(output_dir, self.preferred_format)
    }
}

/// Keep paths that exist, are non-empty and carry an image signature
async fn load_usable(image_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut usable = Vec::with_capacity(image_paths.len());
    for path in image_paths {
        match tokio::fs::read(path).await {
            Ok(bytes) if !bytes.is_empty() && infer::is_image(&bytes) => usable.push(path.clone()),
            Ok(_) => warn!(path = %path.display(), "Skipping unreadable image"),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping missing image"),
        }
    }
    usable
}

/// Enumerate every file under `output_dir` into an artifact set
///
/// Files are ordered by path. The primary mesh is the first file in the
/// preferred format, else the first mesh of any format.
pub fn collect_artifacts(
    output_dir: &Path,
    preferred_format: Option<MeshFormat>,
) -> Result<ReconstructionArtifactSet, ReconstructionError> {
    let mut artifacts = Vec::new();
    for entry in WalkDir::new(output_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ReconstructionError::Io(io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path().to_path_buf();
        let relative_path = path
            .strip_prefix(output_dir)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        artifacts.push(Artifact {
            kind: ArtifactKind::from_path(&path),
            path,
            relative_path,
        });
    }

    let mesh_position = preferred_format
        .and_then(|format| {
            artifacts
                .iter()
                .position(|a| MeshFormat::from_path(&a.path) == Some(format))
        })
        .or_else(|| artifacts.iter().position(|a| a.kind == ArtifactKind::Mesh))
        .ok_or_else(|| ReconstructionError::NoMeshProduced(output_dir.to_path_buf()))?;

    let mesh = artifacts.remove(mesh_position);
    let mesh_format = MeshFormat::from_path(&mesh.path)
        .ok_or_else(|| ReconstructionError::NoMeshProduced(output_dir.to_path_buf()))?;

    Ok(ReconstructionArtifactSet {
        output_dir: output_dir.to_path_buf(),
        mesh,
        mesh_format,
        auxiliary: artifacts,
    })
}
