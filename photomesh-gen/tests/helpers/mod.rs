//! Test Helper Utilities
//!
//! Shared utilities for testing photomesh-gen

#![allow(dead_code)]

pub mod fixtures;
pub mod stubs;

pub use fixtures::{jpeg_assets, multipart_body, Part, JPEG_HEADER, PNG_1X1};
pub use stubs::{StubModel, StubOutput, StubRemover};

use photomesh_common::config::RetentionPolicy;
use photomesh_common::events::EventBus;
use photomesh_gen::services::{
    BackgroundRemovalStage, GpuGate, ImageValidator, PipelineOrchestrator, ReconstructionStage,
    ResultAssembler, WorkDirectoryManager,
};
use photomesh_gen::{AppState, DOWNLOAD_PREFIX};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Orchestrator wired to stubs inside a temporary work root
pub struct TestPipeline {
    pub work_root: TempDir,
    pub orchestrator: PipelineOrchestrator,
    pub event_bus: EventBus,
    pub remover: Arc<StubRemover>,
    pub model: Arc<StubModel>,
}

impl TestPipeline {
    pub fn new(remover: StubRemover, model: StubModel, retention: RetentionPolicy) -> Self {
        Self::with_timeout(remover, model, retention, Duration::from_secs(10))
    }

    /// Pipeline whose inference cap is `timeout`
    pub fn with_timeout(
        remover: StubRemover,
        model: StubModel,
        retention: RetentionPolicy,
        timeout: Duration,
    ) -> Self {
        let work_root = TempDir::new().unwrap();
        let event_bus = EventBus::new(100);
        let remover = Arc::new(remover);
        let model = Arc::new(model);

        let orchestrator = PipelineOrchestrator::new(
            ImageValidator::default(),
            WorkDirectoryManager::new(work_root.path(), retention),
            BackgroundRemovalStage::new(remover.clone(), 5),
            ReconstructionStage::new(model.clone(), Arc::new(GpuGate::new()), timeout),
            ResultAssembler::new(DOWNLOAD_PREFIX),
            event_bus.clone(),
        );

        Self {
            work_root,
            orchestrator,
            event_bus,
            remover,
            model,
        }
    }

    /// Default stubs: every removal succeeds, model produces a textured mesh
    pub fn standard(retention: RetentionPolicy) -> Self {
        Self::new(
            StubRemover::new(),
            StubModel::new(StubOutput::MeshWithTexture),
            retention,
        )
    }

    /// Request directories currently present under the work root
    pub fn request_dirs(&self) -> usize {
        count_entries(self.work_root.path())
    }

    /// App state around this pipeline, for router tests
    pub fn app_state(&self) -> AppState {
        AppState::new(self.orchestrator.clone(), self.event_bus.clone())
    }
}

pub fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}
