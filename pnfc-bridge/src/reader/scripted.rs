//! Line-oriented scripted reader
//!
//! Drives the bridge without NFC hardware, from stdin or a file. One command
//! per line; blank lines and `#` comments are skipped:
//!
//! ```text
//! attach bench
//! present bench 04A1B28F uri:https://listen.plex.tv/player/playback/playMedia?key=%2Flibrary%2Fmetadata%2F10
//! present bench 04A1B28F hex:0404...       # raw Type 2 memory image
//! sleep 5000
//! absent bench
//! error bench antenna fault
//! remove bench
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{CardInfo, MemoryTag, ReaderEvent};
use crate::tag::build_uri_image;

/// Card kind reported for scripted tokens
const SCRIPTED_KIND: &str = "TAG_ISO_14443_3";

/// Script parsing errors
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("Invalid hex image: {0}")]
    InvalidHex(String),

    #[error("Invalid tag contents (expected uri:... or hex:...): {0}")]
    InvalidContents(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed script line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    Attach { reader: String },
    Present { reader: String, uid: String, image: Vec<u8> },
    Absent { reader: String },
    Error { reader: String, message: String },
    Remove { reader: String },
    Sleep(Duration),
}

/// Parse one line; `Ok(None)` for blank lines and comments
pub fn parse_script_line(line: &str) -> Result<Option<ScriptCommand>, ScriptError> {
    let line = strip_comment(line).trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(None);
    };

    let command = match command {
        "attach" => ScriptCommand::Attach {
            reader: required(parts.next(), "attach", "reader")?,
        },
        "present" => {
            let reader = required(parts.next(), "present", "reader")?;
            let uid = required(parts.next(), "present", "uid")?.to_uppercase();
            let contents = required(parts.next(), "present", "contents")?;
            let image = if let Some(uri) = contents.strip_prefix("uri:") {
                let uid_bytes = hex::decode(&uid).map_err(|e| ScriptError::InvalidHex(e.to_string()))?;
                build_uri_image(uri, &uid_bytes)
            } else if let Some(raw) = contents.strip_prefix("hex:") {
                hex::decode(raw).map_err(|e| ScriptError::InvalidHex(e.to_string()))?
            } else {
                return Err(ScriptError::InvalidContents(contents));
            };
            ScriptCommand::Present { reader, uid, image }
        }
        "absent" => ScriptCommand::Absent {
            reader: required(parts.next(), "absent", "reader")?,
        },
        "error" => {
            let reader = required(parts.next(), "error", "reader")?;
            let message = parts.collect::<Vec<_>>().join(" ");
            ScriptCommand::Error { reader, message }
        }
        "remove" => ScriptCommand::Remove {
            reader: required(parts.next(), "remove", "reader")?,
        },
        "sleep" => {
            let ms = required(parts.next(), "sleep", "milliseconds")?;
            let ms = ms
                .parse::<u64>()
                .map_err(|_| ScriptError::InvalidNumber(ms.clone()))?;
            ScriptCommand::Sleep(Duration::from_millis(ms))
        }
        other => return Err(ScriptError::UnknownCommand(other.to_string())),
    };

    Ok(Some(command))
}

/// Cut a trailing `#` comment; `#` only starts one at the beginning of the
/// line or after whitespace, so URI fragments survive
fn strip_comment(line: &str) -> &str {
    let mut previous = None;
    for (index, c) in line.char_indices() {
        if c == '#' && previous.map_or(true, char::is_whitespace) {
            return &line[..index];
        }
        previous = Some(c);
    }
    line
}

fn required(
    value: Option<&str>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, ScriptError> {
    value
        .map(str::to_string)
        .ok_or(ScriptError::MissingArgument { command, argument })
}

/// Feed reader events from a script until it ends or the receiver closes
///
/// Malformed lines are logged and skipped.
pub async fn run_script<R>(input: R, tx: mpsc::Sender<ReaderEvent>) -> Result<(), ScriptError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut current: HashMap<String, CardInfo> = HashMap::new();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let command = match parse_script_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping script line");
                continue;
            }
        };

        let event = match command {
            ScriptCommand::Sleep(duration) => {
                debug!(?duration, "Script sleeping");
                tokio::time::sleep(duration).await;
                continue;
            }
            ScriptCommand::Attach { reader } => ReaderEvent::Attached { reader },
            ScriptCommand::Present { reader, uid, image } => {
                let card = CardInfo::new(uid, SCRIPTED_KIND);
                current.insert(reader.clone(), card.clone());
                ReaderEvent::TokenPresent {
                    reader,
                    card,
                    tag: Arc::new(MemoryTag::new(image)),
                }
            }
            ScriptCommand::Absent { reader } => {
                let card = current.remove(&reader);
                ReaderEvent::TokenAbsent { reader, card }
            }
            ScriptCommand::Error { reader, message } => ReaderEvent::Error { reader, message },
            ScriptCommand::Remove { reader } => {
                current.remove(&reader);
                ReaderEvent::Removed { reader }
            }
        };

        if tx.send(event).await.is_err() {
            debug!("Reader event receiver closed, stopping script");
            return Ok(());
        }
    }

    info!(lines = line_number, "Reader script finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{CardDecoder, Type2TagDecoder, HEADER_LEN};

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(parse_script_line("").unwrap(), None);
        assert_eq!(parse_script_line("   # just a note").unwrap(), None);
    }

    #[test]
    fn test_present_with_uri() {
        let command =
            parse_script_line("present bench 04a1b2 uri:https://host/player?key=1 # album")
                .unwrap()
                .unwrap();
        let ScriptCommand::Present { reader, uid, image } = command else {
            panic!("expected present");
        };
        assert_eq!(reader, "bench");
        assert_eq!(uid, "04A1B2");

        let decoder = Type2TagDecoder::new();
        let info = decoder.parse_info(&image[..HEADER_LEN]).unwrap();
        let records = decoder
            .parse_message(&image[16..16 + info.message_length_to_read])
            .unwrap();
        assert_eq!(records[0].uri.as_deref(), Some("https://host/player?key=1"));
    }

    #[test]
    fn test_uri_fragment_is_not_a_comment() {
        let command =
            parse_script_line("present bench 04a1b2 uri:https://host/player?play=/library/albums/10#frag # note")
                .unwrap()
                .unwrap();
        let ScriptCommand::Present { image, .. } = command else {
            panic!("expected present");
        };

        let decoder = Type2TagDecoder::new();
        let info = decoder.parse_info(&image[..HEADER_LEN]).unwrap();
        let records = decoder
            .parse_message(&image[16..16 + info.message_length_to_read])
            .unwrap();
        assert_eq!(
            records[0].uri.as_deref(),
            Some("https://host/player?play=/library/albums/10#frag")
        );
    }

    #[test]
    fn test_present_with_hex() {
        let command = parse_script_line("present r1 AA hex:0102").unwrap().unwrap();
        assert_eq!(
            command,
            ScriptCommand::Present {
                reader: "r1".to_string(),
                uid: "AA".to_string(),
                image: vec![1, 2],
            }
        );
    }

    #[test]
    fn test_error_message_joined() {
        let command = parse_script_line("error r1 antenna  fault").unwrap().unwrap();
        assert_eq!(
            command,
            ScriptCommand::Error {
                reader: "r1".to_string(),
                message: "antenna fault".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_lines() {
        assert!(matches!(
            parse_script_line("present r1"),
            Err(ScriptError::MissingArgument { argument: "uid", .. })
        ));
        assert!(matches!(
            parse_script_line("present r1 AA file:/tmp/x"),
            Err(ScriptError::InvalidContents(_))
        ));
        assert!(matches!(
            parse_script_line("sleep soon"),
            Err(ScriptError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_script_line("wave r1"),
            Err(ScriptError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_run_script_emits_events_in_order() {
        let script = b"attach r1\npresent r1 04AA uri:https://h/player\nbogus\nabsent r1\nremove r1\n";
        let (tx, mut rx) = mpsc::channel(8);

        run_script(&script[..], tx).await.unwrap();

        assert!(matches!(rx.recv().await, Some(ReaderEvent::Attached { .. })));
        match rx.recv().await {
            Some(ReaderEvent::TokenPresent { card, .. }) => assert_eq!(card.uid, "04AA"),
            other => panic!("expected present, got {:?}", other),
        }
        match rx.recv().await {
            Some(ReaderEvent::TokenAbsent { card, .. }) => {
                assert_eq!(card.map(|c| c.uid).as_deref(), Some("04AA"))
            }
            other => panic!("expected absent, got {:?}", other),
        }
        assert!(matches!(rx.recv().await, Some(ReaderEvent::Removed { .. })));
        assert!(rx.recv().await.is_none());
    }
}
