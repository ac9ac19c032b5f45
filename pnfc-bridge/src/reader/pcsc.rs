//! PC/SC reader source
//!
//! Watches every PC/SC reader (ACR122U and friends) for card insertion and
//! removal and turns them into [`ReaderEvent`]s. The PC/SC API is blocking;
//! [`run_pcsc_monitor`] is meant to run on a blocking thread and tag reads are
//! moved onto the blocking pool.

use async_trait::async_trait;
use parking_lot::Mutex;
use pcsc::{Attribute, Card, Context, Protocols, ReaderState, Scope, ShareMode, State};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CardInfo, ReaderEvent, TagReadError, TagReader, BLOCK_SIZE};

/// Longest READ BINARY answer most contactless readers return
const READ_CHUNK: usize = 16;
const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const GET_UID: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];
/// PC/SC part 3 storage card ATR
const STORAGE_CARD_ATR: [u8; 5] = [0x3B, 0x8F, 0x80, 0x01, 0x80];

fn map_error(error: pcsc::Error) -> TagReadError {
    match error {
        pcsc::Error::RemovedCard | pcsc::Error::ResetCard | pcsc::Error::NoSmartcard => {
            TagReadError::Removed
        }
        other => TagReadError::Reader(other.to_string()),
    }
}

fn transmit(card: &Card, apdu: &[u8]) -> Result<Vec<u8>, TagReadError> {
    let mut buf = [0u8; pcsc::MAX_BUFFER_SIZE];
    let response = card.transmit(apdu, &mut buf).map_err(map_error)?;
    if response.len() < 2 {
        return Err(TagReadError::Reader("Short APDU response".to_string()));
    }
    let (data, status) = response.split_at(response.len() - 2);
    if status != [0x90, 0x00] {
        return Err(TagReadError::Reader(format!(
            "APDU failed with status {}",
            hex::encode_upper(status)
        )));
    }
    Ok(data.to_vec())
}

fn read_blocks(card: &Card, block: u8, len: usize) -> Result<Vec<u8>, TagReadError> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let page = u8::try_from(block as usize + out.len() / BLOCK_SIZE)
            .map_err(|_| TagReadError::OutOfRange { block, len })?;
        let want = (len - out.len()).min(READ_CHUNK);
        let data = transmit(card, &[0xFF, 0xB0, 0x00, page, want as u8])?;
        if data.is_empty() {
            return Err(TagReadError::OutOfRange { block, len });
        }
        out.extend_from_slice(&data[..data.len().min(want)]);
    }
    Ok(out)
}

/// Token on a PC/SC reader
pub struct PcscTag {
    card: Arc<Mutex<Card>>,
}

#[async_trait]
impl TagReader for PcscTag {
    async fn read(&self, block: u8, len: usize) -> Result<Vec<u8>, TagReadError> {
        let card = Arc::clone(&self.card);
        tokio::task::spawn_blocking(move || read_blocks(&card.lock(), block, len))
            .await
            .map_err(|e| TagReadError::Reader(e.to_string()))?
    }
}

fn connect(ctx: &Context, reader: &CStr) -> Result<(CardInfo, PcscTag), TagReadError> {
    let card = ctx
        .connect(reader, ShareMode::Shared, Protocols::ANY)
        .map_err(map_error)?;
    let uid = transmit(&card, &GET_UID)?;
    let kind = match card.get_attribute_owned(Attribute::AtrString) {
        Ok(atr) if atr.starts_with(&STORAGE_CARD_ATR) => "TAG_ISO_14443_3",
        _ => "TAG_ISO_14443_4",
    };

    Ok((
        CardInfo::new(hex::encode_upper(uid), kind),
        PcscTag {
            card: Arc::new(Mutex::new(card)),
        },
    ))
}

/// Watch all PC/SC readers until `shutdown` fires or the receiver goes away
///
/// Blocking; run it with `tokio::task::spawn_blocking`.
pub fn run_pcsc_monitor(
    tx: mpsc::Sender<ReaderEvent>,
    shutdown: CancellationToken,
) -> Result<(), pcsc::Error> {
    let ctx = Context::establish(Scope::User)?;
    let mut states = vec![ReaderState::new(pcsc::PNP_NOTIFICATION(), State::UNAWARE)];
    let mut present: HashMap<String, CardInfo> = HashMap::new();
    info!("PC/SC monitor started");

    while !shutdown.is_cancelled() {
        let mut removed = Vec::new();
        states.retain(|rs| {
            let gone = rs.name() != pcsc::PNP_NOTIFICATION()
                && rs.event_state().intersects(State::UNKNOWN | State::IGNORE);
            if gone {
                removed.push(rs.name().to_string_lossy().into_owned());
            }
            !gone
        });
        for reader in removed {
            present.remove(&reader);
            if tx.blocking_send(ReaderEvent::Removed { reader }).is_err() {
                return Ok(());
            }
        }

        let known: Vec<CString> = states.iter().map(|rs| rs.name().to_owned()).collect();
        let readers = match ctx.list_readers_owned() {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e),
        };
        for name in readers {
            if known.contains(&name) {
                continue;
            }
            let reader = name.to_string_lossy().into_owned();
            if tx.blocking_send(ReaderEvent::Attached { reader }).is_err() {
                return Ok(());
            }
            states.push(ReaderState::new(name, State::UNAWARE));
        }

        for rs in &mut states {
            rs.sync_current_state();
        }
        match ctx.get_status_change(POLL_TIMEOUT, &mut states) {
            Ok(()) => {}
            Err(pcsc::Error::Timeout) => continue,
            Err(e) => return Err(e),
        }

        for rs in &states {
            if rs.name() == pcsc::PNP_NOTIFICATION() {
                continue;
            }
            let state = rs.event_state();
            if !state.contains(State::CHANGED) {
                continue;
            }
            let reader = rs.name().to_string_lossy().into_owned();

            let event = if state.contains(State::PRESENT) && !present.contains_key(&reader) {
                match connect(&ctx, rs.name()) {
                    Ok((card, tag)) => {
                        debug!(reader = %reader, uid = %card.uid, "Card inserted");
                        present.insert(reader.clone(), card.clone());
                        ReaderEvent::TokenPresent {
                            reader,
                            card,
                            tag: Arc::new(tag),
                        }
                    }
                    Err(e) => {
                        warn!(reader = %reader, error = %e, "Could not connect to card");
                        ReaderEvent::Error {
                            reader,
                            message: e.to_string(),
                        }
                    }
                }
            } else if state.contains(State::EMPTY) {
                match present.remove(&reader) {
                    Some(card) => ReaderEvent::TokenAbsent {
                        reader,
                        card: Some(card),
                    },
                    None => continue,
                }
            } else {
                continue;
            };

            if tx.blocking_send(event).is_err() {
                return Ok(());
            }
        }
    }

    info!("PC/SC monitor stopped");
    Ok(())
}
