//! Tag decoding
//!
//! A [`CardDecoder`] turns raw tag bytes into NDEF records. Decoding happens
//! in two steps because the reader must first see the header to know how many
//! bytes of message follow:
//!
//! 1. [`CardDecoder::parse_info`] on the first [`HEADER_LEN`] bytes
//! 2. [`CardDecoder::parse_message`] on `message_length_to_read` bytes read
//!    from [`MESSAGE_START_BLOCK`]

mod type2;
mod uri;

pub use type2::{build_uri_image, Type2TagDecoder};
pub use uri::expand_uri_prefix;

use thiserror::Error;

/// Bytes read to decode the tag header (blocks 0 through 4)
pub const HEADER_LEN: usize = 20;

/// First data block; the NDEF TLV must begin here
pub const MESSAGE_START_BLOCK: u8 = 4;

/// Tag decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagParseError {
    /// Fewer bytes than the structure requires
    #[error("Truncated data: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Capability container does not announce NDEF
    #[error("Tag is not NDEF formatted")]
    NotNdef,

    /// Capability container denies read access
    #[error("Tag is read protected")]
    NotReadable,

    /// No NDEF message TLV at the start of the data area
    #[error("Tag holds no NDEF message")]
    NoMessage,

    /// Record layout could not be followed
    #[error("Malformed NDEF record: {0}")]
    Malformed(String),

    /// Chunked records are not supported
    #[error("Chunked NDEF records are not supported")]
    Chunked,

    /// The first record does not carry a URI
    #[error("First NDEF record is not a URI record")]
    NoUriRecord,
}

/// Header summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    pub is_ndef: bool,
    pub is_readable: bool,
    pub has_message: bool,
    /// Bytes to read from [`MESSAGE_START_BLOCK`] to cover the whole TLV
    pub message_length_to_read: usize,
}

impl TagInfo {
    /// Header allows the message to be read and decoded
    pub fn is_parseable(&self) -> bool {
        self.is_ndef && self.is_readable && self.has_message
    }
}

/// One decoded NDEF record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    /// Type name format (3 bits)
    pub tnf: u8,
    pub record_type: Vec<u8>,
    pub payload: Vec<u8>,
    /// Expanded URI for URI records, `None` otherwise
    pub uri: Option<String>,
}

/// Raw bytes → header summary → NDEF records
pub trait CardDecoder: Send + Sync {
    fn parse_info(&self, header: &[u8]) -> Result<TagInfo, TagParseError>;

    fn parse_message(&self, raw: &[u8]) -> Result<Vec<NdefRecord>, TagParseError>;
}
