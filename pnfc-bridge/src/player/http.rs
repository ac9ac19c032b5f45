//! HTTP player controller
//!
//! Talks to a headless Plexamp player's remote-control endpoints. Card URIs
//! are written against a public host (e.g. `https://listen.plex.tv/player/...`);
//! their path and query are replayed against the configured player instead.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{CommandError, PlayerController};

const PAUSE_PATH: &str = "/player/playback/pause";
const PLAY_PATH: &str = "/player/playback/play";
const CLIENT_ID_HEADER: &str = "X-Plex-Client-Identifier";

/// Player controller speaking HTTP
pub struct HttpPlayerController {
    http_client: reqwest::Client,
    player_uri: Url,
    client_identifier: String,
    command_id: AtomicU64,
}

impl HttpPlayerController {
    pub fn new(
        player_uri: Url,
        client_identifier: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CommandError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pnfc-bridge/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| CommandError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            player_uri,
            client_identifier: client_identifier.into(),
            command_id: AtomicU64::new(0),
        })
    }

    fn next_command_id(&self) -> u64 {
        self.command_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Card URI → request against the configured player
    pub fn start_url(&self, card_uri: &Url, command_id: u64) -> Result<Url, CommandError> {
        let mut target = self
            .player_uri
            .join(card_uri.path())
            .map_err(|e| CommandError::InvalidUri(format!("{}: {}", card_uri, e)))?;
        target.set_query(card_uri.query());
        target
            .query_pairs_mut()
            .append_pair("commandID", &command_id.to_string());
        Ok(target)
    }

    /// Transport command (`pause`, `play`) request
    pub fn transport_url(&self, path: &str, command_id: u64) -> Result<Url, CommandError> {
        let mut target = self
            .player_uri
            .join(path)
            .map_err(|e| CommandError::InvalidUri(e.to_string()))?;
        target
            .query_pairs_mut()
            .append_pair("type", "music")
            .append_pair("commandID", &command_id.to_string());
        Ok(target)
    }

    async fn send(&self, url: Url) -> Result<(), CommandError> {
        debug!(url = %url, "Sending player command");

        let response = self
            .http_client
            .get(url)
            .header(CLIENT_ID_HEADER, &self.client_identifier)
            .send()
            .await
            .map_err(|e| CommandError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CommandError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PlayerController for HttpPlayerController {
    async fn start(&self, uri: &Url) -> Result<(), CommandError> {
        let url = self.start_url(uri, self.next_command_id())?;
        self.send(url).await?;
        info!(uri = %uri, "Playback started");
        Ok(())
    }

    async fn pause(&self) -> Result<(), CommandError> {
        let url = self.transport_url(PAUSE_PATH, self.next_command_id())?;
        self.send(url).await?;
        info!("Playback paused");
        Ok(())
    }

    async fn resume(&self) -> Result<(), CommandError> {
        let url = self.transport_url(PLAY_PATH, self.next_command_id())?;
        self.send(url).await?;
        info!("Playback resumed");
        Ok(())
    }
}
