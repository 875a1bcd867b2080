//! Stage outcomes and the response payload

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use photomesh_common::events::PipelineState;

/// Why an image is used unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No credential supplied; no network call was made
    NoCredential,
    /// Remote removal failed for this image
    RemovalFailed(String),
}

/// Per-image outcome of background removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskedImageResult {
    /// Background removed; RGBA image written to `masked/`
    Removed { index: usize, path: PathBuf },
    /// Use the original image unchanged
    Fallback {
        index: usize,
        original: PathBuf,
        reason: FallbackReason,
    },
}

impl MaskedImageResult {
    pub fn index(&self) -> usize {
        match self {
            MaskedImageResult::Removed { index, .. } | MaskedImageResult::Fallback { index, .. } => {
                *index
            }
        }
    }

    /// Image the reconstruction stage should read for this index
    pub fn usable_path(&self) -> &Path {
        match self {
            MaskedImageResult::Removed { path, .. } => path,
            MaskedImageResult::Fallback { original, .. } => original,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, MaskedImageResult::Removed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            MaskedImageResult::Fallback {
                reason: FallbackReason::RemovalFailed(_),
                ..
            }
        )
    }

    /// Short label used in events and logs
    pub fn outcome_label(&self) -> &'static str {
        match self {
            MaskedImageResult::Removed { .. } => "removed",
            MaskedImageResult::Fallback { .. } => "fallback",
        }
    }
}

/// Aggregate background-removal statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundRemovalSummary {
    /// Whether remote removal was attempted (a credential was present)
    pub attempted: bool,
    /// Images whose background was removed
    pub processed: usize,
    /// Images that fell back after a failed removal
    pub failed: usize,
    pub total: usize,
    /// At least one image is usable
    pub usable: bool,
}

impl BackgroundRemovalSummary {
    /// Fold per-image outcomes into counts
    pub fn from_results(results: &[MaskedImageResult], attempted: bool) -> Self {
        let (processed, failed) = results.iter().fold((0, 0), |(p, f), r| {
            (p + r.is_removed() as usize, f + r.is_failed() as usize)
        });
        let total = results.len();

        Self {
            attempted,
            processed,
            failed,
            total,
            usable: total > 0 && failed < total,
        }
    }

    /// Some images fell back after a failed call
    pub fn is_degraded(&self) -> bool {
        self.failed > 0
    }
}

/// Mesh file formats the viewer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    Obj,
    Ply,
    Glb,
}

impl MeshFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "obj" => Some(MeshFormat::Obj),
            "ply" => Some(MeshFormat::Ply),
            "glb" => Some(MeshFormat::Glb),
            _ => None,
        }
    }
}

impl fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshFormat::Obj => write!(f, "obj"),
            MeshFormat::Ply => write!(f, "ply"),
            MeshFormat::Glb => write!(f, "glb"),
        }
    }
}

/// Role of a produced file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Mesh,
    Material,
    Texture,
    Other,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Self {
        if MeshFormat::from_path(path).is_some() {
            return ArtifactKind::Mesh;
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "mtl" => ArtifactKind::Material,
            "png" | "jpg" | "jpeg" | "webp" => ArtifactKind::Texture,
            _ => ArtifactKind::Other,
        }
    }
}

/// One file produced by reconstruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Path relative to the output directory, `/`-separated
    pub relative_path: String,
    pub kind: ArtifactKind,
}

/// Output of the reconstruction stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionArtifactSet {
    pub output_dir: PathBuf,
    pub mesh: Artifact,
    pub mesh_format: MeshFormat,
    /// Materials, textures and any further meshes
    pub auxiliary: Vec<Artifact>,
}

impl ReconstructionArtifactSet {
    /// Primary mesh first, then auxiliary files
    pub fn all(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.mesh).chain(self.auxiliary.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.auxiliary.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Request-level error category reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Resource,
    Reconstruction,
    Configuration,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Input => "input",
            ErrorKind::Resource => "resource",
            ErrorKind::Reconstruction => "reconstruction",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// Failure details in the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub detail: String,
}

/// One artifact as reported to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub relative_path: String,
    pub path: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    /// Download URL, present only while the work directory is retained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Work directory locations, reported only when the directory is retained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryInfo {
    pub work_directory: String,
    pub image_directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_directory: Option<String>,
    pub output_directory: String,
}

/// Response payload for one reconstruction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub success: bool,
    pub state: PipelineState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<MeshFormat>,
    pub images_received: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_removal: Option<BackgroundRemovalSummary>,
    pub artifacts: Vec<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directories: Option<DirectoryInfo>,
    /// File name → base64 contents, when `include_files` was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_base64: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
