//! NFC reader events
//!
//! A reader source produces [`ReaderEvent`]s on an mpsc channel. Token-present
//! events carry a [`TagReader`] handle so the engine can read exactly the
//! byte ranges it needs while the token is on the reader.

mod scripted;
#[cfg(feature = "pcsc")]
pub mod pcsc;

pub use scripted::{parse_script_line, run_script, ScriptCommand, ScriptError};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Bytes per tag block
pub const BLOCK_SIZE: usize = 4;

/// Tag read errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagReadError {
    /// Requested range lies beyond the tag memory
    #[error("Read of {len} bytes at block {block} is out of range")]
    OutOfRange { block: u8, len: usize },

    /// Token left the field during the read
    #[error("Token removed during read")]
    Removed,

    /// Reader reported a failure
    #[error("Reader error: {0}")]
    Reader(String),
}

/// Read access to a token currently on a reader
#[async_trait]
pub trait TagReader: Send + Sync {
    /// Read `len` bytes starting at `block`
    async fn read(&self, block: u8, len: usize) -> Result<Vec<u8>, TagReadError>;
}

/// Identity of a detected token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// UID as upper-case hex
    pub uid: String,
    /// Card family as reported by the reader (e.g. "TAG_ISO_14443_3")
    pub kind: String,
}

impl CardInfo {
    pub fn new(uid: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            kind: kind.into(),
        }
    }
}

/// Events emitted by reader sources
#[derive(Clone)]
pub enum ReaderEvent {
    /// A reader device was attached
    Attached { reader: String },
    /// A token entered the field
    TokenPresent {
        reader: String,
        card: CardInfo,
        tag: Arc<dyn TagReader>,
    },
    /// The token left the field
    TokenAbsent { reader: String, card: Option<CardInfo> },
    /// The reader reported an error
    Error { reader: String, message: String },
    /// The reader device was detached
    Removed { reader: String },
}

impl fmt::Debug for ReaderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attached { reader } => f.debug_struct("Attached").field("reader", reader).finish(),
            Self::TokenPresent { reader, card, .. } => f
                .debug_struct("TokenPresent")
                .field("reader", reader)
                .field("card", card)
                .finish(),
            Self::TokenAbsent { reader, card } => f
                .debug_struct("TokenAbsent")
                .field("reader", reader)
                .field("card", card)
                .finish(),
            Self::Error { reader, message } => f
                .debug_struct("Error")
                .field("reader", reader)
                .field("message", message)
                .finish(),
            Self::Removed { reader } => f.debug_struct("Removed").field("reader", reader).finish(),
        }
    }
}

/// Tag memory image held in RAM
#[derive(Debug, Clone, Default)]
pub struct MemoryTag {
    bytes: Vec<u8>,
}

impl MemoryTag {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[async_trait]
impl TagReader for MemoryTag {
    async fn read(&self, block: u8, len: usize) -> Result<Vec<u8>, TagReadError> {
        let start = block as usize * BLOCK_SIZE;
        self.bytes
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or(TagReadError::OutOfRange { block, len })
    }
}
