//! NFC Forum Type 2 tag decoding (NTAG21x, Ultralight)
//!
//! Memory is organised in 4-byte blocks. Block 3 holds the capability
//! container (CC); the data area starts at block 4 with a sequence of TLVs.
//! The NDEF message TLV must be the first non-NULL TLV in block 4.

use tracing::debug;

use super::uri::expand_uri_prefix;
use super::{CardDecoder, NdefRecord, TagInfo, TagParseError, HEADER_LEN};

const CC_OFFSET: usize = 12;
const DATA_OFFSET: usize = 16;
const CC_MAGIC: u8 = 0xE1;

const TLV_NULL: u8 = 0x00;
const TLV_NDEF: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0xFE;

const TNF_WELL_KNOWN: u8 = 0x01;
const TNF_ABSOLUTE_URI: u8 = 0x03;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;

/// Type 2 tag decoder
#[derive(Debug, Default, Clone, Copy)]
pub struct Type2TagDecoder;

impl Type2TagDecoder {
    pub fn new() -> Self {
        Self
    }
}

/// TLV header located in a byte slice
struct Tlv {
    tag: u8,
    /// Offset of the value
    value_offset: usize,
    length: usize,
}

/// Find the first non-NULL TLV; `Ok(None)` if the slice ends first
fn first_tlv(data: &[u8]) -> Result<Option<Tlv>, TagParseError> {
    let mut offset = 0;
    while offset < data.len() && data[offset] == TLV_NULL {
        offset += 1;
    }
    let Some(&tag) = data.get(offset) else {
        return Ok(None);
    };
    if tag == TLV_TERMINATOR {
        return Ok(Some(Tlv {
            tag,
            value_offset: offset + 1,
            length: 0,
        }));
    }

    let short = *data.get(offset + 1).ok_or(TagParseError::Truncated {
        needed: offset + 2,
        available: data.len(),
    })?;
    if short != 0xFF {
        return Ok(Some(Tlv {
            tag,
            value_offset: offset + 2,
            length: short as usize,
        }));
    }

    if data.len() < offset + 4 {
        return Err(TagParseError::Truncated {
            needed: offset + 4,
            available: data.len(),
        });
    }
    let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
    Ok(Some(Tlv {
        tag,
        value_offset: offset + 4,
        length,
    }))
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], TagParseError> {
    let end = pos.checked_add(len).filter(|end| *end <= data.len()).ok_or(
        TagParseError::Truncated {
            needed: pos.saturating_add(len),
            available: data.len(),
        },
    )?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn parse_records(message: &[u8]) -> Result<Vec<NdefRecord>, TagParseError> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < message.len() {
        let header = take(message, &mut pos, 1)?[0];
        if records.is_empty() && header & FLAG_MB == 0 {
            return Err(TagParseError::Malformed(
                "first record lacks message-begin flag".to_string(),
            ));
        }
        if header & FLAG_CF != 0 {
            return Err(TagParseError::Chunked);
        }

        let tnf = header & 0x07;
        let type_len = take(message, &mut pos, 1)?[0] as usize;
        let payload_len = if header & FLAG_SR != 0 {
            take(message, &mut pos, 1)?[0] as usize
        } else {
            let bytes = take(message, &mut pos, 4)?;
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        };
        let id_len = if header & FLAG_IL != 0 {
            take(message, &mut pos, 1)?[0] as usize
        } else {
            0
        };

        let record_type = take(message, &mut pos, type_len)?.to_vec();
        take(message, &mut pos, id_len)?;
        let payload = take(message, &mut pos, payload_len)?.to_vec();

        let uri = match tnf {
            TNF_WELL_KNOWN if record_type == b"U" => expand_uri_prefix(&payload),
            TNF_ABSOLUTE_URI => Some(String::from_utf8_lossy(&record_type).into_owned()),
            _ => None,
        };

        records.push(NdefRecord {
            tnf,
            record_type,
            payload,
            uri,
        });

        if header & FLAG_ME != 0 {
            break;
        }
    }

    Ok(records)
}

/// Build a Type 2 memory image holding a single URI record
///
/// Used by the scripted reader to stand in for physical tokens.
pub fn build_uri_image(uri: &str, uid: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(uri.len() + 1);
    payload.push(0x00);
    payload.extend_from_slice(uri.as_bytes());

    let mut record = Vec::with_capacity(payload.len() + 7);
    if payload.len() <= u8::MAX as usize {
        record.extend_from_slice(&[FLAG_MB | FLAG_ME | FLAG_SR | TNF_WELL_KNOWN, 0x01]);
        record.push(payload.len() as u8);
    } else {
        record.extend_from_slice(&[FLAG_MB | FLAG_ME | TNF_WELL_KNOWN, 0x01]);
        record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    record.push(b'U');
    record.extend_from_slice(&payload);

    let mut tlv = vec![TLV_NDEF];
    if record.len() < 0xFF {
        tlv.push(record.len() as u8);
    } else {
        tlv.push(0xFF);
        tlv.extend_from_slice(&(record.len() as u16).to_be_bytes());
    }
    tlv.extend_from_slice(&record);
    tlv.push(TLV_TERMINATOR);

    let mut image = vec![0u8; DATA_OFFSET];
    for (slot, byte) in image.iter_mut().zip(uid.iter().take(9)) {
        *slot = *byte;
    }
    let data_area = tlv.len().div_ceil(8).min(u8::MAX as usize) as u8;
    image[CC_OFFSET..CC_OFFSET + 4].copy_from_slice(&[CC_MAGIC, 0x10, data_area, 0x00]);
    image.extend_from_slice(&tlv);
    while image.len() % 4 != 0 {
        image.push(0x00);
    }
    image
}

impl CardDecoder for Type2TagDecoder {
    fn parse_info(&self, header: &[u8]) -> Result<TagInfo, TagParseError> {
        if header.len() < HEADER_LEN {
            return Err(TagParseError::Truncated {
                needed: HEADER_LEN,
                available: header.len(),
            });
        }

        let cc = &header[CC_OFFSET..CC_OFFSET + 4];
        let is_ndef = cc[0] == CC_MAGIC;
        // Upper nibble of CC3 is read access; 0x0 grants it
        let is_readable = cc[3] >> 4 == 0x0;

        let data = &header[DATA_OFFSET..HEADER_LEN];
        let (has_message, message_length_to_read) = match first_tlv(data) {
            Ok(Some(tlv)) if tlv.tag == TLV_NDEF && tlv.length > 0 => {
                (true, tlv.value_offset + tlv.length)
            }
            Ok(_) => (false, 0),
            Err(e) => {
                debug!(error = %e, "Tag data area header unreadable");
                (false, 0)
            }
        };

        Ok(TagInfo {
            is_ndef,
            is_readable,
            has_message: is_ndef && has_message,
            message_length_to_read,
        })
    }

    fn parse_message(&self, raw: &[u8]) -> Result<Vec<NdefRecord>, TagParseError> {
        let tlv = first_tlv(raw)?.ok_or(TagParseError::NoMessage)?;
        if tlv.tag != TLV_NDEF || tlv.length == 0 {
            return Err(TagParseError::NoMessage);
        }

        let mut pos = tlv.value_offset;
        let message = take(raw, &mut pos, tlv.length)?;
        let records = parse_records(message)?;
        if records.is_empty() {
            return Err(TagParseError::NoMessage);
        }
        Ok(records)
    }
}
