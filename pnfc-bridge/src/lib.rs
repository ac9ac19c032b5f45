//! # Plexamp NFC Bridge Library (pnfc-bridge)
//!
//! Binds NFC cards to a remote Plexamp player session.
//!
//! **Purpose:** Placing a card starts (or resumes) playback of the URI stored
//! on it, removing it optionally pauses, and while it is present the player's
//! event stream is followed to detect when the music no longer matches the
//! card at album or artist level.
//!
//! **Architecture:** reader events → tag decoding → reconciliation engine →
//! player commands and state-channel subscriptions; state-channel events flow
//! back into the engine.

pub mod channel;
pub mod engine;
pub mod error;
pub mod player;
pub mod reader;
pub mod tag;

pub use engine::{EngineOptions, ReconciliationEngine};
pub use error::{BridgeError, Result};
