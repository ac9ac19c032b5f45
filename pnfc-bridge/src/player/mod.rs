//! Player commands
//!
//! The engine only needs three commands from the player: start a card's
//! media, pause, and resume.

mod http;

pub use http::HttpPlayerController;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Player command errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Request never reached the player or the response was lost
    #[error("Transport error: {0}")]
    Transport(String),

    /// Player answered with a non-success status
    #[error("Player returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Card URI cannot be turned into a player request
    #[error("Invalid command URI: {0}")]
    InvalidUri(String),
}

/// Commands issued to the remote player
#[async_trait]
pub trait PlayerController: Send + Sync {
    /// Start playback of the media a card URI points at
    async fn start(&self, uri: &Url) -> Result<(), CommandError>;

    async fn pause(&self) -> Result<(), CommandError>;

    async fn resume(&self) -> Result<(), CommandError>;
}
