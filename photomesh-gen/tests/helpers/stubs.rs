//! Stub collaborators for pipeline tests
//!
//! `StubRemover` stands in for the remote segmentation API and `StubModel`
//! for TripoSR; both count calls so tests can assert on side effects.

use super::fixtures::PNG_1X1;
use async_trait::async_trait;
use photomesh_gen::models::ImageAsset;
use photomesh_gen::services::{
    BackgroundRemovalError, BackgroundRemover, ReconstructionError, ReconstructionModel,
    RuntimeLocation,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Remover that fails for chosen indices
#[derive(Default)]
pub struct StubRemover {
    failing: HashSet<usize>,
    /// When set, image `i` waits `(n - i) * 10ms`, so later images finish first
    reverse_delay_over: Option<usize>,
    calls: AtomicUsize,
}

impl StubRemover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, indices: &[usize]) -> Self {
        self.failing = indices.iter().copied().collect();
        self
    }

    pub fn with_reverse_delays(mut self, image_count: usize) -> Self {
        self.reverse_delay_over = Some(image_count);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackgroundRemover for StubRemover {
    async fn remove(&self, image: &ImageAsset, _credential: &str) -> Result<Vec<u8>, BackgroundRemovalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(n) = self.reverse_delay_over {
            let steps = n.saturating_sub(image.index) as u64;
            tokio::time::sleep(Duration::from_millis(steps * 10)).await;
        }

        if self.failing.contains(&image.index) {
            return Err(BackgroundRemovalError::Http {
                status: 500,
                body: "stub failure".to_string(),
            });
        }
        Ok(PNG_1X1.to_vec())
    }
}

/// What `StubModel::infer` leaves in the output directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubOutput {
    /// `0/mesh.obj`, `0/mesh.mtl` and `0/texture.png`
    MeshWithTexture,
    /// Nothing at all
    Nothing,
    /// Process-style failure
    Fail,
}

/// Reconstruction model double
pub struct StubModel {
    output: StubOutput,
    runtime_present: bool,
    delay: Duration,
    /// Only the first `n` calls are delayed; None delays every call
    delayed_calls: Option<usize>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
    warm_ups: AtomicUsize,
    inputs: Mutex<Vec<Vec<PathBuf>>>,
}

impl StubModel {
    pub fn new(output: StubOutput) -> Self {
        Self {
            output,
            runtime_present: true,
            delay: Duration::ZERO,
            delayed_calls: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            warm_ups: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Runtime lookup fails as if the checkout were missing
    pub fn without_runtime(mut self) -> Self {
        self.runtime_present = false;
        self
    }

    /// Hold the GPU for `delay` on each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay only the first `n` calls
    pub fn delaying_first(mut self, n: usize) -> Self {
        self.delayed_calls = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn warm_ups(&self) -> usize {
        self.warm_ups.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `infer` calls observed
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Image lists passed to each `infer` call
    pub fn inputs(&self) -> Vec<Vec<PathBuf>> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReconstructionModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    fn supports_multi_view(&self) -> bool {
        true
    }

    fn resolve_runtime(&self) -> Result<RuntimeLocation, ReconstructionError> {
        if !self.runtime_present {
            return Err(ReconstructionError::RuntimeNotFound {
                searched: "/nonexistent/TripoSR".to_string(),
            });
        }
        Ok(RuntimeLocation {
            root: PathBuf::from("/stub"),
            entrypoint: PathBuf::from("/stub/run.py"),
        })
    }

    async fn warm_up(&self, _runtime: &RuntimeLocation) -> Result<(), ReconstructionError> {
        self.warm_ups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn infer(
        &self,
        _runtime: &RuntimeLocation,
        images: &[PathBuf],
        output_dir: &Path,
    ) -> Result<(), ReconstructionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(images.to_vec());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if self.delayed_calls.map_or(true, |n| call < n) {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.output {
            StubOutput::MeshWithTexture => {
                let dir = output_dir.join("0");
                std::fs::create_dir_all(&dir)?;
                std::fs::write(dir.join("mesh.obj"), "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n")?;
                std::fs::write(dir.join("mesh.mtl"), "newmtl material0\n")?;
                std::fs::write(dir.join("texture.png"), PNG_1X1)?;
                Ok(())
            }
            StubOutput::Nothing => Ok(()),
            StubOutput::Fail => Err(ReconstructionError::ProcessFailed {
                status: "exit status: 1".to_string(),
                stderr_tail: "CUDA out of memory".to_string(),
            }),
        }
    }
}
