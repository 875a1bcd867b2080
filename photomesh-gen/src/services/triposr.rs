//! TripoSR subprocess model
//!
//! Runs the TripoSR `run.py` entrypoint with the configured interpreter.
//! The entrypoint is searched under each configured root; the process is
//! killed if the calling future is dropped (timeout).

use crate::services::reconstruction::{ReconstructionError, ReconstructionModel, RuntimeLocation};
use async_trait::async_trait;
use photomesh_common::config::ReconstructionConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Entrypoint locations relative to a search root, in priority order
const ENTRYPOINT_CANDIDATES: [&str; 3] = ["run.py", "scripts/run.py", "inference/run.py"];

/// Lines of process output kept for errors and debug logs
const OUTPUT_TAIL_LINES: usize = 20;

/// Time given to the virtual display server to start
const DISPLAY_STARTUP: Duration = Duration::from_millis(200);

pub struct TripoSrModel {
    search_paths: Vec<PathBuf>,
    python: String,
    bake_texture: bool,
    mesh_format: String,
    virtual_display: Option<String>,
}

impl TripoSrModel {
    pub fn new(search_paths: Vec<PathBuf>, python: impl Into<String>) -> Self {
        Self {
            search_paths,
            python: python.into(),
            bake_texture: false,
            mesh_format: "obj".to_string(),
            virtual_display: None,
        }
    }

    /// Build from the `[reconstruction]` section with resolved search paths
    pub fn from_config(config: &ReconstructionConfig, search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            python: config.python.clone(),
            bake_texture: config.bake_texture,
            mesh_format: config.mesh_format.clone(),
            virtual_display: config.virtual_display.clone(),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn build_command(&self, runtime: &RuntimeLocation, images: &[PathBuf], output_dir: &Path) -> Command {
        let mut command = Command::new(&self.python);
        command
            .arg(&runtime.entrypoint)
            .args(images)
            .arg("--output-dir")
            .arg(output_dir)
            .arg("--model-save-format")
            .arg(&self.mesh_format)
            .current_dir(&runtime.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.bake_texture {
            command.arg("--bake-texture");
        }
        if let Some(display) = &self.virtual_display {
            command.env("DISPLAY", display);
        }

        command
    }

    async fn start_display(&self) -> Result<Option<Child>, ReconstructionError> {
        let Some(screen) = &self.virtual_display else {
            return Ok(None);
        };

        let child = Command::new("Xvfb")
            .arg(screen)
            .args(["-screen", "0", "1024x768x24"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ReconstructionError::InterpreterUnavailable(format!("Xvfb could not be started: {}", e))
            })?;

        tokio::time::sleep(DISPLAY_STARTUP).await;
        debug!(display = %screen, "Virtual display started");
        Ok(Some(child))
    }
}

#[async_trait]
impl ReconstructionModel for TripoSrModel {
    fn name(&self) -> &str {
        "triposr"
    }

    fn supports_multi_view(&self) -> bool {
        true
    }

    fn resolve_runtime(&self) -> Result<RuntimeLocation, ReconstructionError> {
        for root in &self.search_paths {
            for candidate in ENTRYPOINT_CANDIDATES {
                let entrypoint = root.join(candidate);
                if entrypoint.is_file() {
                    return Ok(RuntimeLocation {
                        root: root.clone(),
                        entrypoint,
                    });
                }
            }
        }

        Err(ReconstructionError::RuntimeNotFound {
            searched: self
                .search_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    async fn warm_up(&self, runtime: &RuntimeLocation) -> Result<(), ReconstructionError> {
        let output = Command::new(&self.python)
            .arg("--version")
            .current_dir(&runtime.root)
            .output()
            .await
            .map_err(|e| ReconstructionError::InterpreterUnavailable(format!("{}: {}", self.python, e)))?;

        if !output.status.success() {
            return Err(ReconstructionError::InterpreterUnavailable(format!(
                "{} --version exited with {}",
                self.python, output.status
            )));
        }

        // Python 2 prints the version on stderr
        let version = String::from_utf8_lossy(if output.stdout.is_empty() {
            &output.stderr
        } else {
            &output.stdout
        })
        .trim()
        .to_string();
        info!(interpreter = %self.python, version = %version, "TripoSR interpreter ready");
        Ok(())
    }

    async fn infer(
        &self,
        runtime: &RuntimeLocation,
        images: &[PathBuf],
        output_dir: &Path,
    ) -> Result<(), ReconstructionError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let mut display = self.start_display().await?;

        info!(
            entrypoint = %runtime.entrypoint.display(),
            images = images.len(),
            "Running TripoSR"
        );
        let result = self
            .build_command(runtime, images, output_dir)
            .output()
            .await;

        if let Some(child) = display.as_mut() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to stop virtual display");
            }
        }

        let output = result.map_err(|e| ReconstructionError::Execution(e.to_string()))?;

        let stdout_tail = tail(&String::from_utf8_lossy(&output.stdout), OUTPUT_TAIL_LINES);
        if !stdout_tail.is_empty() {
            debug!(output = %stdout_tail, "TripoSR output");
        }

        if !output.status.success() {
            return Err(ReconstructionError::ProcessFailed {
                status: output.status.to_string(),
                stderr_tail: tail(&String::from_utf8_lossy(&output.stderr), OUTPUT_TAIL_LINES),
            });
        }

        Ok(())
    }
}

/// Last `lines` lines of `text`
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n").trim().to_string()
}
