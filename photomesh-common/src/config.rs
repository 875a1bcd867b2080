//! Configuration loading and path resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every field has a
//! compiled default, so a missing file is a warning rather than a startup
//! failure. Resolution priority for overridable values:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the work root
pub const WORK_ROOT_ENV: &str = "PHOTOMESH_WORK_ROOT";

/// Hard upper bound on images per request
pub const DEFAULT_MAX_IMAGES: usize = 5;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Parent directory for per-request work directories
    #[serde(default)]
    pub work_root: Option<PathBuf>,

    /// Maximum number of images accepted per request
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Maximum multipart body size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Folder of sample images used by `GET /demo`
    #[serde(default)]
    pub demo_image_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub background_removal: BackgroundRemovalConfig,

    #[serde(default)]
    pub reconstruction: ReconstructionConfig,

    #[serde(default)]
    pub work_directory: WorkDirectoryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Remote background-removal service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundRemovalConfig {
    /// Segment endpoint URL
    #[serde(default = "default_removal_endpoint")]
    pub endpoint: String,

    /// Fallback API key when a request carries none
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_removal_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per image (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Client-side rate limit; unlimited when absent
    #[serde(default)]
    pub requests_per_second: Option<u32>,

    /// Concurrent calls per request
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

/// Reconstruction runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Directories searched for the model entrypoint, in order
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,

    /// Interpreter used to launch the entrypoint
    #[serde(default = "default_python")]
    pub python: String,

    /// Upper bound on a single inference call in seconds
    #[serde(default = "default_reconstruction_timeout_secs")]
    pub timeout_secs: u64,

    /// Pass every image to the model instead of only the primary view
    #[serde(default = "default_true")]
    pub multi_view: bool,

    /// Ask the model to bake a texture image
    #[serde(default)]
    pub bake_texture: bool,

    /// Mesh export format (obj, glb)
    #[serde(default = "default_mesh_format")]
    pub mesh_format: String,

    /// X display to run the model under (headless rendering); None disables Xvfb
    #[serde(default)]
    pub virtual_display: Option<String>,
}

/// What happens to a request's work directory when the request ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Always delete
    Delete,
    /// Keep directories of successful requests so artifacts can be downloaded
    #[default]
    KeepOnSuccess,
    /// Keep everything (debugging)
    KeepAll,
}

/// Work directory lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkDirectoryConfig {
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Age after which retained directories are swept
    #[serde(default = "default_retention_ttl_secs")]
    pub retention_ttl_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_images() -> usize {
    DEFAULT_MAX_IMAGES
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_removal_endpoint() -> String {
    "https://sdk.photoroom.com/v1/segment".to_string()
}

fn default_removal_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    1
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_IMAGES
}

fn default_search_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("/root/TripoSR")]
}

fn default_python() -> String {
    "python".to_string()
}

fn default_reconstruction_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_mesh_format() -> String {
    "obj".to_string()
}

fn default_retention_ttl_secs() -> u64 {
    3600
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            work_root: None,
            max_images: default_max_images(),
            max_upload_bytes: default_max_upload_bytes(),
            demo_image_dir: None,
            logging: LoggingConfig::default(),
            background_removal: BackgroundRemovalConfig::default(),
            reconstruction: ReconstructionConfig::default(),
            work_directory: WorkDirectoryConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for BackgroundRemovalConfig {
    fn default() -> Self {
        Self {
            endpoint: default_removal_endpoint(),
            api_key: None,
            timeout_secs: default_removal_timeout_secs(),
            max_attempts: default_max_attempts(),
            requests_per_second: None,
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            python: default_python(),
            timeout_secs: default_reconstruction_timeout_secs(),
            multi_view: true,
            bake_texture: false,
            mesh_format: default_mesh_format(),
            virtual_display: None,
        }
    }
}

impl Default for WorkDirectoryConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            retention_ttl_secs: default_retention_ttl_secs(),
        }
    }
}

/// Default TOML location: `<config_dir>/photomesh/photomesh.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("photomesh").join("photomesh.toml"))
}

/// Load TOML configuration, falling back to defaults when the file is missing
///
/// A file that exists but cannot be parsed is an error: silently ignoring a
/// typo would start the service with settings the operator did not ask for.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    if config.max_images == 0 {
        return Err(Error::Config("max_images must be at least 1".to_string()));
    }

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve the work root: CLI → `PHOTOMESH_WORK_ROOT` → TOML → `<tmp>/reconstruction`
pub fn resolve_work_root(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(WORK_ROOT_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.work_root {
        return path.clone();
    }

    std::env::temp_dir().join("reconstruction")
}

/// User-Agent sent to remote services
pub fn get_user_agent() -> String {
    format!("PhotoMesh/{}", env!("CARGO_PKG_VERSION"))
}
