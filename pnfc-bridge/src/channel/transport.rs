//! Server-Sent-Events transport for state channels
//!
//! Streams the player's notification endpoint and dispatches every decoded
//! frame into the channel. Runs until the channel is closed or the stream
//! fails; there is no reconnect, a failed channel stays unusable until the
//! next card placement opens a new one.

use futures::StreamExt;
use pnfc_common::sse::SseDecoder;
use reqwest::header::ACCEPT;
use tracing::{debug, info, trace};

use super::{ChannelError, ChannelEvent, StateChannel};

const CLIENT_ID_HEADER: &str = "X-Plex-Client-Identifier";

/// Pump the event stream into `channel` until it closes or fails
pub async fn run_sse_transport(
    http_client: reqwest::Client,
    client_identifier: String,
    channel: StateChannel,
) {
    let shutdown = channel.shutdown_token();

    tokio::select! {
        _ = shutdown.cancelled() => {
            debug!(endpoint = %channel.endpoint(), "SSE transport stopped by channel close");
        }
        result = pump(&http_client, &client_identifier, &channel) => {
            let error = match result {
                Ok(()) => ChannelError::EndOfStream,
                Err(e) => e,
            };
            channel.mark_failed(&error);
        }
    }
}

async fn pump(
    http_client: &reqwest::Client,
    client_identifier: &str,
    channel: &StateChannel,
) -> Result<(), ChannelError> {
    let response = http_client
        .get(channel.endpoint().clone())
        .header(ACCEPT, "text/event-stream")
        .header(CLIENT_ID_HEADER, client_identifier)
        .send()
        .await
        .map_err(|e| ChannelError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ChannelError::Status(status.as_u16()));
    }

    channel.mark_open();
    info!(endpoint = %channel.endpoint(), "Subscribed to player notifications");

    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ChannelError::Transport(e.to_string()))?;
        for frame in decoder.push(&chunk) {
            trace!(event = %frame.event, data = %frame.data, "SSE frame");
            channel.dispatch(&ChannelEvent::new(frame.event, frame.data));
        }
    }

    Ok(())
}
