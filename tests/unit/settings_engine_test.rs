//! Integration-level unit tests for the SettingsEngine public API.
//!
//! Exercises default loading, immediate persistence of dot-notation updates,
//! reset, and the environment override for the config location.

use std::path::PathBuf;

use serde_json::json;
use smartmarks::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use smartmarks::types::errors::SettingsError;
use smartmarks::types::settings::{AppSettings, BackendKind};
use tempfile::TempDir;

/// Engine backed by a temp directory that lives as long as the caller's handle.
fn engine_in_temp(dir: &TempDir) -> SettingsEngine {
    SettingsEngine::new(Some(dir.path().join("settings.json")))
}

/// Without a config file the built-in defaults apply.
#[test]
fn test_load_defaults_when_no_config_file_exists() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    assert_eq!(engine.load().unwrap(), AppSettings::default());
}

#[test]
fn test_default_values() {
    let defaults = AppSettings::default();
    assert_eq!(defaults.backend.kind, BackendKind::Local);
    assert_eq!(defaults.backend.local_user, "local");
    assert_eq!(defaults.backend.poll_interval_secs, 5);
    assert!(defaults.backend.database_path.is_none());
    assert_eq!(defaults.auth.provider, "google");
    assert_eq!(defaults.auth.redirect_to, "http://localhost:3000");
    assert!(defaults.pipeline.rollback_failed_deletes);
    assert_eq!(defaults.logging.filter, "info");
}

/// A `set_value` call is on disk before it returns.
#[test]
fn test_set_value_persists_immediately() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.load().unwrap();
    engine.set_value("pipeline.rollback_failed_deletes", json!(false)).unwrap();
    engine.set_value("backend.poll_interval_secs", json!(30)).unwrap();

    let mut reloaded = engine_in_temp(&dir);
    let settings = reloaded.load().unwrap();
    assert!(!settings.pipeline.rollback_failed_deletes);
    assert_eq!(settings.backend.poll_interval_secs, 30);
}

#[test]
fn test_set_value_errors_leave_settings_untouched() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.load().unwrap();

    assert!(matches!(engine.set_value("", json!(1)), Err(SettingsError::InvalidKey(_))));
    assert!(matches!(engine.set_value("nonexistent.key", json!(1)), Err(SettingsError::InvalidKey(_))));
    assert!(matches!(
        engine.set_value("backend.poll_interval_secs", json!("soon")),
        Err(SettingsError::InvalidValue(_))
    ));
    assert!(matches!(
        engine.set_value("backend.kind", json!("Carrier pigeon")),
        Err(SettingsError::InvalidValue(_))
    ));
    assert_eq!(*engine.get_settings(), AppSettings::default());
}

#[test]
fn test_reset_restores_defaults_on_disk() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.load().unwrap();
    engine.set_value("auth.provider", json!("github")).unwrap();

    engine.reset().unwrap();
    assert_eq!(*engine.get_settings(), AppSettings::default());
    let mut reloaded = engine_in_temp(&dir);
    assert_eq!(reloaded.load().unwrap(), AppSettings::default());
}

#[test]
fn test_load_malformed_json_is_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("settings.json"), "{ invalid json }").unwrap();
    let mut engine = engine_in_temp(&dir);
    assert!(matches!(engine.load(), Err(SettingsError::SerializationError(_))));
}

/// Files written before the logging section existed still load.
#[test]
fn test_load_without_logging_section() {
    let dir = TempDir::new().unwrap();
    let mut value = serde_json::to_value(AppSettings::default()).unwrap();
    value.as_object_mut().unwrap().remove("logging");
    std::fs::write(dir.path().join("settings.json"), value.to_string()).unwrap();

    let mut engine = engine_in_temp(&dir);
    assert_eq!(engine.load().unwrap().logging.filter, "info");
}

#[test]
fn test_save_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("settings.json");
    let mut engine = SettingsEngine::new(Some(path.clone()));
    engine.load().unwrap();
    engine.save().unwrap();
    assert!(path.exists());
    assert_eq!(engine.get_config_path(), path.as_path());
}

#[test]
fn test_database_path_follows_setting() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.load().unwrap();
    let db = dir.path().join("bookmarks.db");
    engine
        .set_value("backend.database_path", json!(db.to_string_lossy()))
        .unwrap();
    assert_eq!(engine.database_path(), PathBuf::from(db));
}
