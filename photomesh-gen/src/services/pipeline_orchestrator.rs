//! Reconstruction pipeline orchestrator
//!
//! Drives one request through its states:
//! VALIDATING → DIRECTORY_ACQUIRED → BACKGROUND_REMOVING → RECONSTRUCTING →
//! ASSEMBLING → SUCCEEDED, or FAILED / CANCELLED from any earlier state.
//!
//! Input and configuration problems are detected before a work directory
//! exists. Once acquired, the directory is released on every return path
//! (and by `Drop` if the task itself is dropped).

use crate::error::PipelineError;
use crate::models::{
    BackgroundRemovalSummary, DirectoryInfo, PipelineResult, PipelineRun, ReconstructionArtifactSet,
    ReconstructionRequest,
};
use crate::services::background_removal::BackgroundRemovalStage;
use crate::services::reconstruction::{ReconstructionStage, RuntimeLocation};
use crate::services::result_assembler::{AssemblyContext, ResultAssembler};
use crate::services::validator::ImageValidator;
use crate::services::work_directory::{WorkDirectory, WorkDirectoryManager};
use chrono::Utc;
use photomesh_common::events::{EventBus, PipelineEvent, PipelineState};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Coordinates the pipeline stages for each request
#[derive(Clone)]
pub struct PipelineOrchestrator {
    validator: ImageValidator,
    work_dirs: WorkDirectoryManager,
    background_removal: BackgroundRemovalStage,
    reconstruction: ReconstructionStage,
    assembler: ResultAssembler,
    event_bus: EventBus,
}

impl PipelineOrchestrator {
    pub fn new(
        validator: ImageValidator,
        work_dirs: WorkDirectoryManager,
        background_removal: BackgroundRemovalStage,
        reconstruction: ReconstructionStage,
        assembler: ResultAssembler,
        event_bus: EventBus,
    ) -> Self {
        Self {
            validator,
            work_dirs,
            background_removal,
            reconstruction,
            assembler,
            event_bus,
        }
    }

    pub fn work_directories(&self) -> &WorkDirectoryManager {
        &self.work_dirs
    }

    pub fn reconstruction(&self) -> &ReconstructionStage {
        &self.reconstruction
    }

    pub fn max_images(&self) -> usize {
        self.validator.max_images()
    }

    /// Run a request to a terminal state
    ///
    /// Never panics on stage failure; every outcome is a [`PipelineResult`].
    pub async fn run(&self, request: ReconstructionRequest, cancel: CancellationToken) -> PipelineResult {
        let request_id = request.request_id();
        let mut run = PipelineRun::new(request_id);
        let images_received = request.images().len();

        info!(
            request_id = %request_id,
            images = images_received,
            credential = request.credential().is_some(),
            include_files = request.include_files(),
            "Reconstruction request started"
        );
        self.event_bus.emit_lossy(PipelineEvent::RequestStarted {
            request_id,
            image_count: images_received,
            timestamp: Utc::now(),
        });

        let context = AssemblyContext {
            request_id,
            images_received,
            background_removal: None,
            include_files: request.include_files(),
            retained: false,
            directories: None,
            duration_ms: 0,
        };

        // VALIDATING: nothing touches the filesystem until these pass
        if let Err(e) = self.validator.validate(request.images()) {
            return self.finish(&mut run, context, Err(e.into())).await;
        }

        let runtime = match self.reconstruction.check_runtime() {
            Ok(runtime) => runtime,
            Err(e) => return self.finish(&mut run, context, Err(e.into())).await,
        };

        if cancel.is_cancelled() {
            return self.finish(&mut run, context, Err(PipelineError::Cancelled)).await;
        }

        let mut work_dir = match self.work_dirs.acquire(request_id).await {
            Ok(work_dir) => work_dir,
            Err(e) => return self.finish(&mut run, context, Err(e.into())).await,
        };
        self.transition(&mut run, PipelineState::DirectoryAcquired);

        let mut summary = None;
        let outcome = self
            .process(&request, &runtime, &work_dir, &cancel, &mut run, &mut summary)
            .await;

        let succeeded = outcome.is_ok();
        if succeeded {
            self.transition(&mut run, PipelineState::Assembling);
        }

        let retained = work_dir.will_retain(succeeded);
        let context = AssemblyContext {
            background_removal: summary,
            retained,
            directories: Some(directory_info(&work_dir, summary)),
            duration_ms: run.elapsed_ms(),
            ..context
        };

        // Assemble first: embedded files are read from the directory
        let result = self.finish(&mut run, context, outcome).await;

        if let Err(e) = work_dir.release(succeeded).await {
            warn!(request_id = %request_id, error = %e, "Failed to release work directory");
        }

        result
    }

    /// Stages that run inside the work directory
    async fn process(
        &self,
        request: &ReconstructionRequest,
        runtime: &RuntimeLocation,
        work_dir: &WorkDirectory,
        cancel: &CancellationToken,
        run: &mut PipelineRun,
        summary: &mut Option<BackgroundRemovalSummary>,
    ) -> Result<ReconstructionArtifactSet, PipelineError> {
        let request_id = request.request_id();
        let raw_paths = work_dir.save_images(request.images()).await?;

        self.transition(run, PipelineState::BackgroundRemoving);
        let (results, removal_summary) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = self.background_removal.remove_backgrounds(
                request_id,
                request.images(),
                &raw_paths,
                work_dir.masked_dir(),
                request.credential(),
            ) => outcome,
        };
        *summary = Some(removal_summary);

        for result in &results {
            self.event_bus.emit_lossy(PipelineEvent::ImageMasked {
                request_id,
                index: result.index(),
                outcome: result.outcome_label().to_string(),
                timestamp: Utc::now(),
            });
        }

        if removal_summary.attempted && !removal_summary.usable {
            warn!(
                request_id = %request_id,
                failed = removal_summary.failed,
                "All background removals failed, reconstructing from originals"
            );
        }

        let usable: Vec<PathBuf> = results
            .iter()
            .map(|r| r.usable_path().to_path_buf())
            .collect();

        self.transition(run, PipelineState::Reconstructing);
        let artifacts = self
            .reconstruction
            .reconstruct(runtime, &usable, work_dir.output_dir(), cancel)
            .await?;

        debug!(
            request_id = %request_id,
            mesh = %artifacts.mesh.relative_path,
            files = artifacts.len(),
            "Artifacts collected"
        );
        Ok(artifacts)
    }

    /// Assemble the response and move to the terminal state
    async fn finish(
        &self,
        run: &mut PipelineRun,
        context: AssemblyContext,
        outcome: Result<ReconstructionArtifactSet, PipelineError>,
    ) -> PipelineResult {
        let context = AssemblyContext {
            duration_ms: run.elapsed_ms(),
            ..context
        };
        let result = self.assembler.assemble(context, outcome.as_ref()).await;

        match &outcome {
            Ok(artifacts) => {
                self.transition(run, PipelineState::Succeeded);
                info!(
                    request_id = %run.request_id,
                    mesh = %artifacts.mesh.relative_path,
                    format = %artifacts.mesh_format,
                    duration_ms = result.duration_ms,
                    "Reconstruction succeeded"
                );
                self.event_bus.emit_lossy(PipelineEvent::RequestSucceeded {
                    request_id: run.request_id,
                    mesh_file: artifacts.mesh.relative_path.clone(),
                    duration_ms: result.duration_ms,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                let terminal = match e {
                    PipelineError::Cancelled => PipelineState::Cancelled,
                    _ => PipelineState::Failed,
                };
                self.transition(run, terminal);
                match e {
                    PipelineError::Input(_) | PipelineError::Cancelled => info!(
                        request_id = %run.request_id,
                        kind = %e.kind(),
                        error = %e,
                        "Reconstruction request ended"
                    ),
                    _ => error!(
                        request_id = %run.request_id,
                        kind = %e.kind(),
                        error = %e,
                        "Reconstruction request failed"
                    ),
                }
                self.event_bus.emit_lossy(PipelineEvent::RequestFailed {
                    request_id: run.request_id,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        result
    }

    fn transition(&self, run: &mut PipelineRun, new_state: PipelineState) {
        let transition = run.transition_to(new_state);
        debug!(
            request_id = %transition.request_id,
            from = ?transition.old_state,
            to = ?transition.new_state,
            "State transition"
        );
        self.event_bus.emit_lossy(PipelineEvent::StateChanged {
            request_id: transition.request_id,
            old_state: transition.old_state,
            new_state: transition.new_state,
            timestamp: transition.transitioned_at,
        });
    }
}

fn directory_info(work_dir: &WorkDirectory, summary: Option<BackgroundRemovalSummary>) -> DirectoryInfo {
    DirectoryInfo {
        work_directory: work_dir.root().display().to_string(),
        image_directory: work_dir.images_dir().display().to_string(),
        masked_directory: summary
            .filter(|s| s.processed > 0)
            .map(|_| work_dir.masked_dir().display().to_string()),
        output_directory: work_dir.output_dir().display().to_string(),
    }
}
