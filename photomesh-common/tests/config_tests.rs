//! Integration tests for configuration loading and work-root resolution
//!
//! Tests that manipulate PHOTOMESH_WORK_ROOT are marked #[serial] so they do
//! not race each other on the process environment.

use photomesh_common::config::{
    load_toml_config, resolve_work_root, write_toml_config, RetentionPolicy, TomlConfig,
    WORK_ROOT_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("does-not-exist.toml");

    let config = load_toml_config(&path).expect("missing file must not be fatal");

    assert_eq!(config.port, 8000);
    assert_eq!(config.max_images, 5);
    assert!(config.background_removal.api_key.is_none());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(err.to_string().contains("Parse TOML failed"));
}

#[test]
fn test_zero_max_images_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("zero.toml");
    std::fs::write(&path, "max_images = 0").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
fn test_write_then_load_preserves_fields() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("photomesh.toml");

    let mut config = TomlConfig::default();
    config.port = 9001;
    config.background_removal.api_key = Some("toml-key".to_string());
    config.reconstruction.search_paths = vec![PathBuf::from("/opt/triposr")];
    config.work_directory.retention = RetentionPolicy::Delete;

    write_toml_config(&config, &path).unwrap();
    assert!(!path.with_extension("toml.tmp").exists(), "temp file should be renamed");

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded.port, 9001);
    assert_eq!(loaded.background_removal.api_key.as_deref(), Some("toml-key"));
    assert_eq!(loaded.reconstruction.search_paths, vec![PathBuf::from("/opt/triposr")]);
    assert_eq!(loaded.work_directory.retention, RetentionPolicy::Delete);
}

#[test]
#[serial]
fn test_work_root_cli_wins() {
    env::set_var(WORK_ROOT_ENV, "/tmp/photomesh-env-root");

    let mut config = TomlConfig::default();
    config.work_root = Some(PathBuf::from("/tmp/photomesh-toml-root"));

    let root = resolve_work_root(Some(Path::new("/tmp/photomesh-cli-root")), &config);
    assert_eq!(root, PathBuf::from("/tmp/photomesh-cli-root"));

    env::remove_var(WORK_ROOT_ENV);
}

#[test]
#[serial]
fn test_work_root_env_beats_toml() {
    env::set_var(WORK_ROOT_ENV, "/tmp/photomesh-env-root");

    let mut config = TomlConfig::default();
    config.work_root = Some(PathBuf::from("/tmp/photomesh-toml-root"));

    assert_eq!(
        resolve_work_root(None, &config),
        PathBuf::from("/tmp/photomesh-env-root")
    );

    env::remove_var(WORK_ROOT_ENV);
}

#[test]
#[serial]
fn test_work_root_default_under_temp_dir() {
    env::remove_var(WORK_ROOT_ENV);

    let root = resolve_work_root(None, &TomlConfig::default());
    assert_eq!(root, env::temp_dir().join("reconstruction"));
}
