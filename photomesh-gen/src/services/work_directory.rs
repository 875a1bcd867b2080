//! Per-request work directories
//!
//! Each request gets `<work_root>/request_<id>/{images,masked,output}`. The
//! root is created with `create_dir` (not `create_dir_all`) so two live
//! requests can never share one.
//!
//! [`WorkDirectory`] is a scope guard: callers release it explicitly with the
//! request outcome, and `Drop` removes anything still unreleased (error
//! returns, panics, a cancelled task being dropped).

use crate::models::{ImageAsset, ImageKind};
use photomesh_common::config::RetentionPolicy;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REQUEST_DIR_PREFIX: &str = "request_";

/// Written into a request root when release keeps it; only marked roots are swept
const RETAINED_MARKER: &str = ".retained";

/// Work directory errors (Resource category)
#[derive(Debug, Error)]
pub enum WorkDirectoryError {
    #[error("Failed to create work directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What `release` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Removed,
    Retained,
    AlreadyReleased,
}

/// Allocates and sweeps request directories under one root
#[derive(Debug, Clone)]
pub struct WorkDirectoryManager {
    root: PathBuf,
    retention: RetentionPolicy,
}

impl WorkDirectoryManager {
    pub fn new(root: impl Into<PathBuf>, retention: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Whether any request directory can outlive its request
    pub fn retains_any(&self) -> bool {
        self.retention != RetentionPolicy::Delete
    }

    /// Directory a request uses (whether or not it exists)
    pub fn request_dir(&self, request_id: Uuid) -> PathBuf {
        self.root
            .join(format!("{}{}", REQUEST_DIR_PREFIX, request_id.simple()))
    }

    /// Create the request root and its three subareas
    pub async fn acquire(&self, request_id: Uuid) -> Result<WorkDirectory, WorkDirectoryError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| WorkDirectoryError::Create {
                path: self.root.clone(),
                source,
            })?;

        let root = self.request_dir(request_id);
        tokio::fs::create_dir(&root)
            .await
            .map_err(|source| WorkDirectoryError::Create {
                path: root.clone(),
                source,
            })?;

        // From here on the guard owns the root, so a failure below still cleans up
        let work_dir = WorkDirectory {
            request_id,
            images_dir: root.join("images"),
            masked_dir: root.join("masked"),
            output_dir: root.join("output"),
            root,
            retention: self.retention,
            released: false,
        };

        for dir in [&work_dir.images_dir, &work_dir.masked_dir, &work_dir.output_dir] {
            tokio::fs::create_dir(dir)
                .await
                .map_err(|source| WorkDirectoryError::Create {
                    path: dir.clone(),
                    source,
                })?;
        }

        debug!(
            request_id = %request_id,
            root = %work_dir.root.display(),
            "Work directory acquired"
        );

        Ok(work_dir)
    }

    /// Locate a retained artifact for download
    ///
    /// Only plain relative paths inside the request's `output/` resolve;
    /// anything with `..`, a root, or a prefix is refused.
    pub fn resolve_artifact(&self, request_id: Uuid, relative_path: &str) -> Option<PathBuf> {
        let relative = Path::new(relative_path);
        if relative_path.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }

        let path = self.request_dir(request_id).join("output").join(relative);
        path.is_file().then_some(path)
    }

    /// Delete retained request directories whose retention began more than `ttl` ago
    ///
    /// Directories of requests still in flight carry no marker and are never
    /// touched. Returns the number of directories removed.
    pub async fn sweep_expired(&self, ttl: Duration) -> io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(REQUEST_DIR_PREFIX) {
                continue;
            }

            let Ok(marker) = tokio::fs::metadata(entry.path().join(RETAINED_MARKER)).await else {
                continue;
            };

            let age = marker
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();

            if age >= ttl {
                match tokio::fs::remove_dir_all(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "Failed to sweep expired work directory"
                    ),
                }
            }
        }

        if removed > 0 {
            info!(removed, "Swept expired work directories");
        }
        Ok(removed)
    }
}

/// Request-scoped directory tree
#[derive(Debug)]
pub struct WorkDirectory {
    request_id: Uuid,
    root: PathBuf,
    images_dir: PathBuf,
    masked_dir: PathBuf,
    output_dir: PathBuf,
    retention: RetentionPolicy,
    released: bool,
}

impl WorkDirectory {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn masked_dir(&self) -> &Path {
        &self.masked_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Whether release will keep the tree for the given outcome
    pub fn will_retain(&self, succeeded: bool) -> bool {
        match self.retention {
            RetentionPolicy::Delete => false,
            RetentionPolicy::KeepOnSuccess => succeeded,
            RetentionPolicy::KeepAll => true,
        }
    }

    /// Write raw uploads as `images/image_{i:03}.{ext}`, index order preserved
    ///
    /// The extension comes from the file signature, then the declared type,
    /// then `.jpg`.
    pub async fn save_images(&self, images: &[ImageAsset]) -> Result<Vec<PathBuf>, WorkDirectoryError> {
        let mut saved = Vec::with_capacity(images.len());

        for image in images {
            let kind = ImageKind::sniff(&image.bytes)
                .or_else(|| image.content_type.as_deref().and_then(ImageKind::from_content_type))
                .or_else(|| ImageKind::from_filename(&image.filename))
                .unwrap_or(ImageKind::Jpeg);

            let path = self
                .images_dir
                .join(format!("image_{:03}{}", image.index, kind.extension()));

            tokio::fs::write(&path, &image.bytes)
                .await
                .map_err(|source| WorkDirectoryError::Write {
                    path: path.clone(),
                    source,
                })?;
            saved.push(path);
        }

        debug!(
            request_id = %self.request_id,
            count = saved.len(),
            "Saved raw images"
        );
        Ok(saved)
    }

    /// End the directory's lifetime according to the retention policy
    ///
    /// Idempotent: later calls return `AlreadyReleased`.
    pub async fn release(&mut self, succeeded: bool) -> io::Result<ReleaseOutcome> {
        if self.released {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        self.released = true;

        if self.will_retain(succeeded) {
            tokio::fs::write(self.root.join(RETAINED_MARKER), b"").await?;
            debug!(
                request_id = %self.request_id,
                root = %self.root.display(),
                "Work directory retained"
            );
            return Ok(ReleaseOutcome::Retained);
        }

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        debug!(request_id = %self.request_id, "Work directory removed");
        Ok(ReleaseOutcome::Removed)
    }
}

impl Drop for WorkDirectory {
    fn drop(&mut self) {
        if self.released || self.retention == RetentionPolicy::KeepAll {
            return;
        }

        warn!(
            request_id = %self.request_id,
            "Work directory dropped without release, removing"
        );
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    request_id = %self.request_id,
                    error = %e,
                    "Failed to remove unreleased work directory"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_creates_subareas() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::Delete);
        let mut work_dir = manager.acquire(Uuid::new_v4()).await.unwrap();

        assert!(work_dir.images_dir().is_dir());
        assert!(work_dir.masked_dir().is_dir());
        assert!(work_dir.output_dir().is_dir());
        assert!(work_dir.root().starts_with(temp.path()));

        work_dir.release(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_same_request_id_cannot_be_acquired_twice() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::Delete);
        let request_id = Uuid::new_v4();

        let mut first = manager.acquire(request_id).await.unwrap();
        assert!(matches!(
            manager.acquire(request_id).await,
            Err(WorkDirectoryError::Create { .. })
        ));

        first.release(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_twice_is_safe() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::Delete);
        let mut work_dir = manager.acquire(Uuid::new_v4()).await.unwrap();
        let root = work_dir.root().to_path_buf();

        assert_eq!(work_dir.release(true).await.unwrap(), ReleaseOutcome::Removed);
        assert!(!root.exists());
        assert_eq!(
            work_dir.release(true).await.unwrap(),
            ReleaseOutcome::AlreadyReleased
        );
    }

    #[tokio::test]
    async fn test_keep_on_success_retains_only_successes() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::KeepOnSuccess);

        let mut ok = manager.acquire(Uuid::new_v4()).await.unwrap();
        assert_eq!(ok.release(true).await.unwrap(), ReleaseOutcome::Retained);
        assert!(ok.root().exists());

        let mut failed = manager.acquire(Uuid::new_v4()).await.unwrap();
        assert_eq!(failed.release(false).await.unwrap(), ReleaseOutcome::Removed);
        assert!(!failed.root().exists());
    }

    #[tokio::test]
    async fn test_drop_without_release_removes_tree() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::KeepOnSuccess);
        let work_dir = manager.acquire(Uuid::new_v4()).await.unwrap();
        let root = work_dir.root().to_path_buf();

        drop(work_dir);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_save_images_uses_sniffed_extension() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::Delete);
        let mut work_dir = manager.acquire(Uuid::new_v4()).await.unwrap();

        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let images = vec![
            // Declared jpeg but actually png
            ImageAsset::new(0, "a.jpg", Some("image/jpeg".to_string()), png),
            ImageAsset::new(1, "b.bin", None, vec![1, 2, 3]),
        ];

        let saved = work_dir.save_images(&images).await.unwrap();
        assert_eq!(saved[0].file_name().unwrap(), "image_000.png");
        assert_eq!(saved[1].file_name().unwrap(), "image_001.jpg");
        assert_eq!(std::fs::read(&saved[1]).unwrap(), vec![1, 2, 3]);

        work_dir.release(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_artifact_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::KeepAll);
        let request_id = Uuid::new_v4();
        let mut work_dir = manager.acquire(request_id).await.unwrap();

        std::fs::create_dir_all(work_dir.output_dir().join("0")).unwrap();
        std::fs::write(work_dir.output_dir().join("0/mesh.obj"), "v 0 0 0").unwrap();
        std::fs::write(work_dir.images_dir().join("image_000.jpg"), "x").unwrap();

        assert!(manager.resolve_artifact(request_id, "0/mesh.obj").is_some());
        assert!(manager.resolve_artifact(request_id, "missing.obj").is_none());
        assert!(manager
            .resolve_artifact(request_id, "../images/image_000.jpg")
            .is_none());
        assert!(manager.resolve_artifact(request_id, "/etc/passwd").is_none());
        assert!(manager.resolve_artifact(request_id, "").is_none());

        work_dir.release(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_request_dirs() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::KeepAll);
        let mut work_dir = manager.acquire(Uuid::new_v4()).await.unwrap();
        work_dir.release(true).await.unwrap();
        std::fs::create_dir(temp.path().join("unrelated")).unwrap();

        // Nothing is older than an hour yet
        assert_eq!(manager.sweep_expired(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(work_dir.root().exists());

        assert_eq!(manager.sweep_expired(Duration::ZERO).await.unwrap(), 1);
        assert!(!work_dir.root().exists());
        assert!(temp.path().join("unrelated").exists());
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_request_dirs_alone() {
        let temp = TempDir::new().unwrap();
        let manager = WorkDirectoryManager::new(temp.path(), RetentionPolicy::KeepOnSuccess);
        let mut live = manager.acquire(Uuid::new_v4()).await.unwrap();

        assert_eq!(manager.sweep_expired(Duration::ZERO).await.unwrap(), 0);
        assert!(live.root().exists());

        let images = vec![ImageAsset::new(0, "a.jpg", None, vec![0xFF, 0xD8, 0xFF])];
        assert!(live.save_images(&images).await.is_ok());

        // Once retained it becomes eligible
        assert_eq!(live.release(true).await.unwrap(), ReleaseOutcome::Retained);
        assert!(live.root().join(RETAINED_MARKER).is_file());
        assert_eq!(manager.sweep_expired(Duration::ZERO).await.unwrap(), 1);
        assert!(!live.root().exists());
    }

    #[test]
    fn test_delete_policy_retains_nothing() {
        assert!(!WorkDirectoryManager::new("/tmp/w", RetentionPolicy::Delete).retains_any());
        assert!(WorkDirectoryManager::new("/tmp/w", RetentionPolicy::KeepOnSuccess).retains_any());
        assert!(WorkDirectoryManager::new("/tmp/w", RetentionPolicy::KeepAll).retains_any());
    }

    #[tokio::test]
    async fn test_sweep_missing_root_is_noop() {
        let temp = TempDir::new().unwrap();
        let manager =
            WorkDirectoryManager::new(temp.path().join("never-created"), RetentionPolicy::KeepAll);
        assert_eq!(manager.sweep_expired(Duration::ZERO).await.unwrap(), 0);
    }
}
