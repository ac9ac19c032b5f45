//! Settings file loading
//!
//! Settings are re-read on every reader event, so edits made while the
//! bridge is running must be visible on the next load.

use pnfc_common::{Error, JsonSettingsFile, Settings, SettingsSource};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let source = JsonSettingsFile::new(dir.path().join("settings.json"));

    let settings = source.load().unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_file_is_reread_on_every_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, r#"{"pauseOnCardRemoval": false, "trackCardState": false}"#).unwrap();

    let source = JsonSettingsFile::new(&path);
    assert!(!source.load().unwrap().pause_on_card_removal);

    fs::write(&path, r#"{"pauseOnCardRemoval": true, "trackCardState": true}"#).unwrap();
    let settings = source.load().unwrap();
    assert!(settings.pause_on_card_removal);
    assert!(settings.track_card_state);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, "{ not json").unwrap();

    let result = JsonSettingsFile::new(&path).load();
    match result {
        Err(Error::Settings(message)) => assert!(message.contains("settings.json")),
        other => panic!("expected settings error, got {:?}", other),
    }
}

#[test]
fn test_all_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{
            "pauseOnCardRemoval": true,
            "resumeOnCardPlacement": false,
            "trackCardState": true
        }"#,
    )
    .unwrap();

    let settings = JsonSettingsFile::new(&path).load().unwrap();
    assert_eq!(
        settings,
        Settings {
            pause_on_card_removal: true,
            resume_on_card_placement: false,
            track_card_state: true,
        }
    );
}
