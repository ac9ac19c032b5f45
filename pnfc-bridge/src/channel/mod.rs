//! Player state channel
//!
//! One server-pushed event connection per session, opened lazily when card
//! state tracking is enabled. The engine attaches and detaches listeners on
//! it; closing it is the only way in-flight tracking is cancelled.

mod state_channel;
mod transport;

pub use state_channel::{
    ChannelEvent, ConnectionState, ListenerCallback, ListenerId, ListenerMode, StateChannel,
};
pub use transport::run_sse_transport;

use std::time::Duration;
use thiserror::Error;
use url::Url;

/// State channel transport errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Connection could not be established or broke mid-stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Player answered the subscription with a non-success status
    #[error("Subscription rejected with status {0}")]
    Status(u16),

    /// Player ended the stream
    #[error("Event stream ended")]
    EndOfStream,

    /// Event payload could not be decoded
    #[error("Invalid event payload: {0}")]
    Payload(String),
}

/// Opens state channels
pub trait ChannelConnector: Send + Sync {
    /// Create a channel for `endpoint`; the connection is established in the
    /// background and the handle is usable immediately
    fn connect(&self, endpoint: Url) -> StateChannel;
}

/// Connector backed by the player's Server-Sent-Events stream
#[derive(Clone)]
pub struct SseConnector {
    http_client: reqwest::Client,
    client_identifier: String,
}

impl SseConnector {
    pub fn new(
        client_identifier: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        // No overall timeout: the stream stays open for the whole session
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pnfc-bridge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            client_identifier: client_identifier.into(),
        })
    }
}

impl ChannelConnector for SseConnector {
    fn connect(&self, endpoint: Url) -> StateChannel {
        let channel = StateChannel::new(endpoint);
        tokio::spawn(run_sse_transport(
            self.http_client.clone(),
            self.client_identifier.clone(),
            channel.clone(),
        ));
        channel
    }
}
