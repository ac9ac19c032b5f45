//! Playback-state events pushed by the player
//!
//! The player publishes a `state` event on its notification stream whenever
//! playback changes. The payload is JSON:
//!
//! ```json
//! {"state": "playing", "parentKey": "/library/metadata/10",
//!  "grandparentKey": "/library/metadata/5",
//!  "parentTitle": "Album", "grandparentTitle": "Artist"}
//! ```
//!
//! Only the fields needed to follow album/artist identity are modelled;
//! everything else in the payload is ignored.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Player transport state as reported on the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlaybackStatus {
    Playing,
    Stopped,
    /// Any other state (paused, buffering, ...), kept verbatim for logging
    Other(String),
}

impl From<String> for PlaybackStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "playing" => Self::Playing,
            "stopped" => Self::Stopped,
            _ => Self::Other(value),
        }
    }
}

impl From<PlaybackStatus> for String {
    fn from(value: PlaybackStatus) -> Self {
        match value {
            PlaybackStatus::Playing => "playing".to_string(),
            PlaybackStatus::Stopped => "stopped".to_string(),
            PlaybackStatus::Other(other) => other,
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playing => f.write_str("playing"),
            Self::Stopped => f.write_str("stopped"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKey {
    Text(String),
    Number(serde_json::Number),
}

/// Library metadata key (`parentKey` / `grandparentKey`)
///
/// Players report keys either as path strings or as bare numbers; both are
/// normalised to their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawKey", into = "String")]
pub struct MetadataKey(String);

impl MetadataKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<RawKey> for MetadataKey {
    fn from(raw: RawKey) -> Self {
        match raw {
            RawKey::Text(text) => Self(text),
            RawKey::Number(number) => Self(number.to_string()),
        }
    }
}

impl From<MetadataKey> for String {
    fn from(key: MetadataKey) -> Self {
        key.0
    }
}

impl From<&str> for MetadataKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `state` event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayStateEvent {
    pub state: PlaybackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<MetadataKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grandparent_key: Option<MetadataKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grandparent_title: Option<String>,
}

impl PlayStateEvent {
    /// Parse an event payload; empty keys are treated as absent
    pub fn from_json(json: &str) -> Result<Self> {
        let mut event: Self = serde_json::from_str(json)?;
        event.parent_key = event.parent_key.filter(|key| !key.is_empty());
        event.grandparent_key = event.grandparent_key.filter(|key| !key.is_empty());
        Ok(event)
    }

    /// "Artist - Album" for log lines, using whatever titles are present
    pub fn display_title(&self) -> String {
        match (&self.grandparent_title, &self.parent_title) {
            (Some(artist), Some(album)) => format!("{} - {}", artist, album),
            (Some(artist), None) => artist.clone(),
            (None, Some(album)) => album.clone(),
            (None, None) => "<unknown>".to_string(),
        }
    }
}

/// Last observed playback identity
///
/// Replaced wholesale by every incoming event, never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayState {
    pub status: PlaybackStatus,
    pub parent_key: Option<MetadataKey>,
    pub grandparent_key: Option<MetadataKey>,
}

impl From<&PlayStateEvent> for PlayState {
    fn from(event: &PlayStateEvent) -> Self {
        Self {
            status: event.state.clone(),
            parent_key: event.parent_key.clone(),
            grandparent_key: event.grandparent_key.clone(),
        }
    }
}
