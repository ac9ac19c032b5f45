//! Server-Sent Events (SSE) frame decoding
//!
//! Incremental decoder for `text/event-stream` bodies. Bytes are pushed in
//! whatever chunks the transport delivers; complete frames come out.

use std::fmt::Write as _;

/// Event name used when a frame carries no `event:` field
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event type name
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
    /// Last event ID seen on the stream
    pub id: Option<String>,
    /// Reconnection time requested by the server
    pub retry: Option<u64>,
}

impl SseFrame {
    pub fn new(event: &str, data: &str) -> Self {
        Self {
            event: event.to_string(),
            data: data.to_string(),
            id: None,
            retry: None,
        }
    }

    /// Format as SSE protocol string
    pub fn to_sse_string(&self) -> String {
        let mut output = String::new();

        if let Some(id) = &self.id {
            let _ = writeln!(output, "id: {}", id);
        }
        if let Some(retry) = self.retry {
            let _ = writeln!(output, "retry: {}", retry);
        }

        let _ = writeln!(output, "event: {}", self.event);
        for line in self.data.split('\n') {
            let _ = writeln!(output, "data: {}", line);
        }
        output.push('\n');

        output
    }
}

/// Incremental `text/event-stream` decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: String,
    has_data: bool,
    last_id: Option<String>,
    retry: Option<u64>,
    started: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body, returning every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        if !self.started {
            // Strip a leading UTF-8 BOM once enough bytes are known
            if self.pending.len() < 3 && b"\xEF\xBB\xBF".starts_with(&self.pending) {
                return Vec::new();
            }
            if self.pending.starts_with(b"\xEF\xBB\xBF") {
                self.pending.drain(..3);
            }
            self.started = true;
        }

        let mut frames = Vec::new();
        let mut start = 0;
        let mut index = 0;

        while index < self.pending.len() {
            match self.pending[index] {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.pending[start..index]).into_owned();
                    self.process_line(&line, &mut frames);
                    index += 1;
                    start = index;
                }
                b'\r' => {
                    // A trailing CR may be the first half of CRLF
                    if index + 1 == self.pending.len() {
                        break;
                    }
                    let line = String::from_utf8_lossy(&self.pending[start..index]).into_owned();
                    self.process_line(&line, &mut frames);
                    index += if self.pending[index + 1] == b'\n' { 2 } else { 1 };
                    start = index;
                }
                _ => index += 1,
            }
        }

        self.pending.drain(..start);
        frames
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            self.dispatch(frames);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
                self.has_data = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(retry) = value.parse::<u64>() {
                    self.retry = Some(retry);
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, frames: &mut Vec<SseFrame>) {
        let event = self.event.take();
        if !self.has_data {
            self.data.clear();
            return;
        }

        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        self.has_data = false;

        frames.push(SseFrame {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id: self.last_id.clone(),
            retry: self.retry,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: state\ndata: {\"state\":\"playing\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "state");
        assert_eq!(frames[0].data, "{\"state\":\"playing\"}");
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: sta").is_empty());
        assert!(decoder.push(b"te\r").is_empty());
        assert!(decoder.push(b"\ndata: 1\r\n").is_empty());
        let frames = decoder.push(b"\r\n");
        assert_eq!(frames, vec![SseFrame::new("state", "1")]);
    }

    #[test]
    fn test_multi_line_data_and_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\ndata: a\ndata:b\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, DEFAULT_EVENT);
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn test_blank_line_without_data_resets_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: ping\n\n").is_empty());
        let frames = decoder.push(b"data: x\n\n");
        assert_eq!(frames[0].event, DEFAULT_EVENT);
    }

    #[test]
    fn test_bare_cr_terminators() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: state\rdata: 2\r\rdata: 3\r\r");
        // The final CR is held back until the next chunk proves it is not CRLF
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "2");
        let frames = decoder.push(b"\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "3");
    }

    #[test]
    fn test_id_and_retry() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"id: 7\nretry: 3000\ndata: x\n\n");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].retry, Some(3000));
    }

    #[test]
    fn test_bom_stripped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"\xEF\xBB").is_empty());
        let frames = decoder.push(b"\xBFdata: y\n\n");
        assert_eq!(frames, vec![SseFrame::new(DEFAULT_EVENT, "y")]);
    }

    #[test]
    fn test_encoded_frame_decodes() {
        let mut frame = SseFrame::new("state", "line one\nline two");
        frame.id = Some("42".to_string());
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(frame.to_sse_string().as_bytes());
        assert_eq!(frames, vec![frame]);
    }
}
