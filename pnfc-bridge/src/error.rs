//! Error types for pnfc-bridge
//!
//! Every failure inside a token handler maps onto one of these kinds. They are
//! caught and logged at the present/absent handler boundary and never
//! propagate past it.

use std::time::Duration;
use thiserror::Error;

use crate::channel::ChannelError;
use crate::player::CommandError;
use crate::reader::TagReadError;
use crate::tag::TagParseError;

/// Main error type for pnfc-bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Tag is unformatted, unreadable, empty or malformed
    #[error("Could not parse tag: {0}")]
    TagParse(#[from] TagParseError),

    /// Reader failed to return tag bytes
    #[error("Tag read error: {0}")]
    TagRead(#[from] TagReadError),

    /// Tag holds a URI the player cannot act on
    #[error("Unexpected URL: {0}")]
    UnexpectedUri(String),

    /// No playback snapshot arrived in time (non-fatal)
    #[error("Initial playback snapshot timed out after {0:?}")]
    SnapshotTimeout(Duration),

    /// State channel transport failure
    #[error("State channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Player rejected or never received a command
    #[error("Player command error: {0}")]
    Command(#[from] CommandError),

    /// Settings could not be loaded
    #[error("Settings error: {0}")]
    Settings(#[from] pnfc_common::Error),
}

/// Convenience Result type using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
