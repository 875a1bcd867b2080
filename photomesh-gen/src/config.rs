//! Configuration resolution for photomesh-gen
//!
//! Background-removal credential: request field → ENV → TOML.
//! Model search path: `TRIPOSR_DIR` (CLI or ENV) → TOML `search_paths`.

use crate::models::MeshFormat;
use photomesh_common::config::TomlConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variables checked for the removal credential, in order
pub const CREDENTIAL_ENV_VARS: [&str; 2] = ["PHOTOMESH_PHOTOROOM_API_KEY", "PHOTOROOM_API_KEY"];

/// Environment variable naming the TripoSR checkout
pub const TRIPOSR_DIR_ENV: &str = "TRIPOSR_DIR";

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the server-wide default removal credential
///
/// **Priority:** ENV → TOML. None disables background removal for requests
/// that do not bring their own key.
pub fn resolve_default_credential(toml_config: &TomlConfig) -> Option<String> {
    let env_key = CREDENTIAL_ENV_VARS.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .filter(|key| is_valid_key(key))
            .map(|key| (*name, key))
    });
    let toml_key = toml_config
        .background_removal
        .api_key
        .as_ref()
        .filter(|key| is_valid_key(key));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Background removal key found in both environment and TOML. Using environment.");
    }

    if let Some((name, key)) = env_key {
        info!("Background removal key loaded from {}", name);
        return Some(key.trim().to_string());
    }

    if let Some(key) = toml_key {
        info!("Background removal key loaded from TOML config");
        return Some(key.trim().to_string());
    }

    info!("No background removal key configured; requests must supply their own");
    None
}

/// Pick the credential for one request: its own field wins over the default
pub fn request_credential(request_key: Option<&str>, default_key: Option<&str>) -> Option<String> {
    request_key
        .filter(|key| is_valid_key(key))
        .or(default_key.filter(|key| is_valid_key(key)))
        .map(|key| key.trim().to_string())
}

/// Model search roots: explicit directory first, then TOML entries, deduplicated
pub fn resolve_search_paths(triposr_dir: Option<&Path>, toml_config: &TomlConfig) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();

    let explicit = triposr_dir.map(Path::to_path_buf).or_else(|| {
        std::env::var(TRIPOSR_DIR_ENV)
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
    });

    for path in explicit
        .into_iter()
        .chain(toml_config.reconstruction.search_paths.iter().cloned())
    {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    paths
}

/// Configured primary mesh format; unknown values fall back to any mesh
pub fn preferred_mesh_format(toml_config: &TomlConfig) -> Option<MeshFormat> {
    let format = MeshFormat::from_path(Path::new(&format!(
        "mesh.{}",
        toml_config.reconstruction.mesh_format
    )));
    if format.is_none() {
        warn!(
            "Unknown mesh_format '{}', accepting any mesh format",
            toml_config.reconstruction.mesh_format
        );
    }
    format
}
