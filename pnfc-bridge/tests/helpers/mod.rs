//! Test Helper Utilities
//!
//! Shared utilities for testing pnfc-bridge

#![allow(dead_code)]

pub mod fakes;
pub mod log_capture;
pub mod player_server;

// Re-export commonly used items
pub use fakes::{
    card, settings, state_event, uri_tag, ManualConnector, PlayerCommand, RecordingPlayer,
    SwitchableSettings, TestBridge, ALBUM_URI, READER, SNAPSHOT_TIMEOUT, STATE,
};
pub use log_capture::{capture_logs, LogCapture};
pub use player_server::{FakePlayerServer, RecordedRequest};
