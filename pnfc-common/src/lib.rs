//! # Plexamp NFC Common Library
//!
//! Shared code for the NFC bridge service and its tooling:
//! - Error types
//! - Service configuration loading (TOML, environment, compiled defaults)
//! - Per-event settings snapshots (`settings.json`)
//! - Playback-state event payloads pushed by the player
//! - Server-Sent Events frame decoding

pub mod config;
pub mod error;
pub mod events;
pub mod settings;
pub mod sse;

pub use error::{Error, Result};
pub use events::{MetadataKey, PlayState, PlayStateEvent, PlaybackStatus};
pub use settings::{JsonSettingsFile, Settings, SettingsSource};
