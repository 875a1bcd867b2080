//! Builds the response payload from stage outcomes
//!
//! Only I/O: file sizes, and file contents when the caller asked for
//! embedded files. Must run before the work directory is released.

use crate::error::PipelineError;
use crate::models::{
    ArtifactInfo, BackgroundRemovalSummary, DirectoryInfo, FailureInfo, PipelineResult,
    ReconstructionArtifactSet,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use photomesh_common::events::PipelineState;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

const SUCCESS_MESSAGE: &str = "3D model generated successfully";

/// Per-request facts the assembler needs besides the stage outcome
#[derive(Debug, Clone)]
pub struct AssemblyContext {
    pub request_id: Uuid,
    pub images_received: usize,
    pub background_removal: Option<BackgroundRemovalSummary>,
    pub include_files: bool,
    /// Work directory outlives the request, so paths and URLs stay valid
    pub retained: bool,
    pub directories: Option<DirectoryInfo>,
    pub duration_ms: u64,
}

/// Maps outcomes to [`PipelineResult`]s
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    download_prefix: String,
}

impl ResultAssembler {
    /// `download_prefix` is the route artifacts are served under, e.g. `/download`
    pub fn new(download_prefix: impl Into<String>) -> Self {
        Self {
            download_prefix: download_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn download_url(&self, request_id: Uuid, relative_path: &str) -> String {
        format!("{}/{}/{}", self.download_prefix, request_id, relative_path)
    }

    pub async fn assemble(
        &self,
        context: AssemblyContext,
        outcome: Result<&ReconstructionArtifactSet, &PipelineError>,
    ) -> PipelineResult {
        match outcome {
            Ok(artifacts) => self.success(context, artifacts).await,
            Err(error) => self.failure(context, error),
        }
    }

    async fn success(&self, context: AssemblyContext, set: &ReconstructionArtifactSet) -> PipelineResult {
        let mut artifacts = Vec::with_capacity(set.len());
        let mut files = context.include_files.then(BTreeMap::new);

        for artifact in set.all() {
            let size_bytes = match tokio::fs::metadata(&artifact.path).await {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!(path = %artifact.path.display(), error = %e, "Artifact metadata unavailable");
                    0
                }
            };

            if let Some(files) = files.as_mut() {
                match tokio::fs::read(&artifact.path).await {
                    Ok(bytes) => {
                        files.insert(artifact.relative_path.clone(), STANDARD.encode(bytes));
                    }
                    Err(e) => warn!(
                        path = %artifact.path.display(),
                        error = %e,
                        "Skipping artifact in embedded files"
                    ),
                }
            }

            artifacts.push(ArtifactInfo {
                name: artifact
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| artifact.relative_path.clone()),
                relative_path: artifact.relative_path.clone(),
                path: artifact.path.display().to_string(),
                kind: artifact.kind,
                size_bytes,
                url: context
                    .retained
                    .then(|| self.download_url(context.request_id, &artifact.relative_path)),
            });
        }

        PipelineResult {
            request_id: context.request_id,
            success: true,
            state: PipelineState::Succeeded,
            message: SUCCESS_MESSAGE.to_string(),
            model_url: context
                .retained
                .then(|| self.download_url(context.request_id, &set.mesh.relative_path)),
            model_path: context
                .retained
                .then(|| set.mesh.path.display().to_string()),
            format: Some(set.mesh_format),
            images_received: context.images_received,
            background_removal: context.background_removal,
            artifacts,
            directories: context.directories.filter(|_| context.retained),
            files_base64: files,
            error: None,
            duration_ms: context.duration_ms,
        }
    }

    fn failure(&self, context: AssemblyContext, error: &PipelineError) -> PipelineResult {
        let state = match error {
            PipelineError::Cancelled => PipelineState::Cancelled,
            _ => PipelineState::Failed,
        };

        PipelineResult {
            request_id: context.request_id,
            success: false,
            state,
            message: error.to_string(),
            model_url: None,
            model_path: None,
            format: None,
            images_received: context.images_received,
            background_removal: context.background_removal,
            artifacts: Vec::new(),
            directories: context.directories.filter(|_| context.retained),
            files_base64: None,
            error: Some(FailureInfo {
                kind: error.kind(),
                detail: error.detail(),
            }),
            duration_ms: context.duration_ms,
        }
    }
}

impl Default for ResultAssembler {
    fn default() -> Self {
        Self::new("/download")
    }
}
