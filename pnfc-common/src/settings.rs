//! User-facing playback settings
//!
//! Settings live in a small JSON document (`settings.json`) that the user may
//! edit while the bridge is running. They are read synchronously on every
//! reader event that needs them and never cached between events.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Snapshot of the user settings at the moment of a reader event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Pause the player when the active card is removed
    pub pause_on_card_removal: bool,
    /// Resume instead of restarting when the active card is placed again
    pub resume_on_card_placement: bool,
    /// Follow the player's event stream to detect album/artist changes
    pub track_card_state: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pause_on_card_removal: false,
            resume_on_card_placement: true,
            track_card_state: false,
        }
    }
}

impl Settings {
    /// Parse a settings document; absent keys fall back to defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Settings(e.to_string()))
    }
}

/// Synchronous source of settings snapshots
pub trait SettingsSource: Send + Sync {
    /// Load a fresh snapshot
    fn load(&self) -> Result<Settings>;
}

/// A fixed snapshot is its own source
impl SettingsSource for Settings {
    fn load(&self) -> Result<Settings> {
        Ok(*self)
    }
}

/// Settings read from a JSON file on every call
#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for JsonSettingsFile {
    /// A missing file is not an error: defaults are used and a warning logged
    fn load(&self) -> Result<Settings> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %self.path.display(),
                    "Settings file not found, using defaults"
                );
                return Ok(Settings::default());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let settings = Settings::from_json(&content).map_err(|e| {
            Error::Settings(format!("{}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), ?settings, "Loaded settings");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.pause_on_card_removal);
        assert!(settings.resume_on_card_placement);
        assert!(!settings.track_card_state);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let settings = Settings::from_json(r#"{"trackCardState": true}"#).unwrap();
        assert!(settings.track_card_state);
        assert!(settings.resume_on_card_placement);
        assert!(!settings.pause_on_card_removal);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let settings =
            Settings::from_json(r#"{"pauseOnCardRemoval": true, "theme": "dark"}"#).unwrap();
        assert!(settings.pause_on_card_removal);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let result = Settings::from_json(r#"{"pauseOnCardRemoval": "yes"}"#);
        assert!(matches!(result, Err(Error::Settings(_))));
    }
}
