//! Presence/playback reconciliation
//!
//! **Purpose:** Turn token-present and token-absent events from any number of
//! readers into player commands, and follow the player's state stream to
//! learn whether the music still matches the card on the reader.
//!
//! **Ownership:** Every reader has a generation counter. A present handler
//! claims the reader by bumping it before reading the tag; any later present,
//! absent or reader removal bumps it again. Each step of a handler that
//! mutates shared state first checks that its generation is still current and
//! otherwise returns [`PresentOutcome::Superseded`] without side effects.
//!
//! **Locking:** One mutex guards all reader slots. It is never held across an
//! await. Channel listener callbacks take it; the channel never holds its own
//! lock while running them.

mod classify;
mod session;
mod tracker;

pub use classify::{classify, is_active_card, Binding, Classification};
pub use session::ReaderSnapshot;
pub use tracker::{CloseReason, TrackerPhase, Transition};

use parking_lot::Mutex;
use pnfc_common::config::{BridgeConfig, ChannelPolicy};
use pnfc_common::{PlayState, PlayStateEvent, SettingsSource};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::channel::{ChannelConnector, ChannelError, ChannelEvent, ListenerMode};
use crate::error::{BridgeError, Result};
use crate::player::PlayerController;
use crate::reader::{CardInfo, ReaderEvent, TagReader};
use crate::tag::{CardDecoder, TagParseError, HEADER_LEN, MESSAGE_START_BLOCK};
use session::{ReaderSlot, Session};

/// Card URIs must address the player's remote-control API
pub const PLAYER_PATH_PREFIX: &str = "/player";

/// Engine tuning resolved from configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Full URI of the player's notification stream
    pub notifications_endpoint: Url,
    /// Event name carrying play-state payloads
    pub state_event: String,
    /// How long a placement waits for the initial snapshot
    pub snapshot_timeout: Duration,
    pub channel_policy: ChannelPolicy,
}

impl EngineOptions {
    pub fn from_config(config: &BridgeConfig) -> pnfc_common::Result<Self> {
        Ok(Self {
            notifications_endpoint: config.notifications_endpoint()?,
            state_event: config.state_event.clone(),
            snapshot_timeout: config.snapshot_timeout,
            channel_policy: config.channel_policy,
        })
    }
}

/// How a token placement was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Tag is empty, locked, unformatted or malformed; nothing was done
    Unparseable,
    /// Tag holds a URI that does not address the player
    Rejected,
    /// Tag read or player command failed
    Failed,
    /// A later event took over the reader
    Superseded,
    Started,
    Resumed,
}

/// How a token removal was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentOutcome {
    /// No session on the reader
    NoSession,
    /// Session ended without pausing
    Cleared,
    Paused,
    /// Session ended but the pause command failed
    PauseFailed,
}

struct EngineInner {
    decoder: Arc<dyn CardDecoder>,
    player: Arc<dyn PlayerController>,
    connector: Arc<dyn ChannelConnector>,
    settings: Arc<dyn SettingsSource>,
    options: EngineOptions,
    readers: Mutex<HashMap<String, ReaderSlot>>,
}

/// Reconciliation engine shared by all readers
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl ReconciliationEngine {
    pub fn new(
        decoder: Arc<dyn CardDecoder>,
        player: Arc<dyn PlayerController>,
        connector: Arc<dyn ChannelConnector>,
        settings: Arc<dyn SettingsSource>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                decoder,
                player,
                connector,
                settings,
                options,
                readers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Handle a token entering a reader's field
    pub async fn on_token_present(
        &self,
        reader: &str,
        card: &CardInfo,
        tag: &dyn TagReader,
    ) -> PresentOutcome {
        let generation = self.inner.claim(reader);
        self.handle_present(reader, generation, card, tag).await
    }

    async fn handle_present(
        &self,
        reader: &str,
        generation: u64,
        card: &CardInfo,
        tag: &dyn TagReader,
    ) -> PresentOutcome {
        info!(reader, uid = %card.uid, kind = %card.kind, "Token detected");

        let card_uri = match self.inner.read_card_uri(tag).await {
            Ok(Some(uri)) => uri,
            Ok(None) => {
                warn!(
                    reader,
                    "unparseable tag: it is empty, locked, not NDEF formatted or unreadable"
                );
                self.inner.release_claim(reader, generation);
                return PresentOutcome::Unparseable;
            }
            Err(BridgeError::TagParse(e)) => {
                warn!(reader, error = %e, "unparseable tag");
                self.inner.release_claim(reader, generation);
                return PresentOutcome::Unparseable;
            }
            Err(e @ BridgeError::UnexpectedUri(_)) => {
                error!(reader, error = %e, "Card rejected");
                self.inner.release_claim(reader, generation);
                return PresentOutcome::Rejected;
            }
            Err(e) => {
                error!(reader, error = %e, "Could not read tag");
                self.inner.release_claim(reader, generation);
                return PresentOutcome::Failed;
            }
        };

        if !self.inner.begin_session(reader, generation, &card_uri) {
            debug!(reader, "Placement superseded before the session began");
            return PresentOutcome::Superseded;
        }

        match self.inner.drive_session(reader, generation, &card_uri).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(reader, error = %e, "Token placement aborted");
                self.inner.abort_session(reader, generation);
                PresentOutcome::Failed
            }
        }
    }

    /// Handle a token leaving a reader's field
    pub async fn on_token_absent(&self, reader: &str) -> AbsentOutcome {
        info!(reader, "Token removed");

        let pause_on_removal = match self.inner.settings.load() {
            Ok(settings) => settings.pause_on_card_removal,
            Err(e) => {
                error!(reader, error = %BridgeError::from(e), "Could not load settings, not pausing");
                false
            }
        };

        let Some(was_active) = self.inner.end_session(reader) else {
            debug!(reader, "No session on reader");
            return AbsentOutcome::NoSession;
        };
        if !(was_active && pause_on_removal) {
            return AbsentOutcome::Cleared;
        }

        match self.inner.player.pause().await {
            Ok(()) => AbsentOutcome::Paused,
            Err(e) => {
                error!(reader, error = %BridgeError::from(e), "Pause on removal failed");
                AbsentOutcome::PauseFailed
            }
        }
    }

    /// Handle a reader device going away; its binding is kept
    pub fn on_reader_removed(&self, reader: &str) {
        if self.inner.end_session(reader).is_some() {
            info!(reader, "Reader removed, session ended");
        } else {
            info!(reader, "Reader removed");
        }
    }

    /// Current view of a reader
    pub fn snapshot(&self, reader: &str) -> Option<ReaderSnapshot> {
        self.inner.readers.lock().get(reader).map(ReaderSnapshot::of)
    }

    /// Consume reader events until the sender side closes
    ///
    /// Present handlers run as their own tasks so a slow player never delays
    /// absent handling; the reader is claimed before the task is spawned so
    /// event order is preserved. Returns once the sender has closed and every
    /// placement still in flight has finished.
    pub async fn run(&self, mut events: mpsc::Receiver<ReaderEvent>) {
        info!("Reconciliation engine running");
        let mut placements = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch_event(event, &mut placements).await,
                    None => break,
                },
                Some(joined) = placements.join_next(), if !placements.is_empty() => {
                    log_placement_join(joined);
                }
            }
        }

        if !placements.is_empty() {
            debug!(in_flight = placements.len(), "Waiting for placements to finish");
        }
        while let Some(joined) = placements.join_next().await {
            log_placement_join(joined);
        }
        info!("Reader event stream ended");
    }

    async fn dispatch_event(&self, event: ReaderEvent, placements: &mut JoinSet<()>) {
        match event {
            ReaderEvent::Attached { reader } => {
                info!(reader = %reader, "Reader attached");
            }
            ReaderEvent::TokenPresent { reader, card, tag } => {
                let generation = self.inner.claim(&reader);
                let engine = self.clone();
                placements.spawn(async move {
                    let outcome = engine
                        .handle_present(&reader, generation, &card, tag.as_ref())
                        .await;
                    debug!(reader = %reader, ?outcome, "Placement handled");
                });
            }
            ReaderEvent::TokenAbsent { reader, card } => {
                if let Some(card) = card {
                    debug!(reader = %reader, uid = %card.uid, "Token left the field");
                }
                let outcome = self.on_token_absent(&reader).await;
                debug!(reader = %reader, ?outcome, "Removal handled");
            }
            ReaderEvent::Error { reader, message } => {
                warn!(reader = %reader, error = %message, "Reader error");
            }
            ReaderEvent::Removed { reader } => {
                self.on_reader_removed(&reader);
            }
        }
    }

    /// End every session and close every channel
    pub fn shutdown(&self) {
        let mut readers = self.inner.readers.lock();
        for (reader, slot) in readers.iter_mut() {
            slot.generation += 1;
            if let Some(mut session) = slot.session.take() {
                session.close_channel();
                debug!(reader = %reader, session_id = %session.id, "Session closed on shutdown");
            }
        }
        info!("Reconciliation engine stopped");
    }
}

fn log_placement_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Placement task failed");
    }
}

impl EngineInner {
    /// Take ownership of a reader for a new placement
    ///
    /// Any previous session stops tracking immediately; its record is settled
    /// once the new card is known.
    fn claim(&self, reader: &str) -> u64 {
        let mut readers = self.readers.lock();
        let slot = readers.entry(reader.to_string()).or_default();
        slot.generation += 1;
        if let Some(previous) = slot.session.as_mut() {
            previous.detach_listener(&self.options.state_event);
        }
        slot.generation
    }

    /// Placement produced no card; end whatever was left on the reader
    fn release_claim(&self, reader: &str, generation: u64) {
        let mut readers = self.readers.lock();
        if let Some(mut previous) = readers
            .get_mut(reader)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.session.take())
        {
            previous.close_channel();
            debug!(reader, session_id = %previous.id, "Previous session ended");
        }
    }

    async fn read_card_uri(&self, tag: &dyn TagReader) -> Result<Option<Url>> {
        let header = tag.read(0, HEADER_LEN).await?;
        let info = self.decoder.parse_info(&header)?;
        if !info.is_parseable() {
            debug!(?info, "Tag header not parseable");
            return Ok(None);
        }

        let raw = tag
            .read(MESSAGE_START_BLOCK, info.message_length_to_read)
            .await?;
        let records = self.decoder.parse_message(&raw)?;
        let text = records
            .first()
            .and_then(|r| r.uri.as_deref())
            .ok_or(TagParseError::NoUriRecord)?;

        let uri = Url::parse(text)
            .map_err(|e| BridgeError::UnexpectedUri(format!("{} ({})", text, e)))?;
        if !uri.path().starts_with(PLAYER_PATH_PREFIX) {
            return Err(BridgeError::UnexpectedUri(uri.to_string()));
        }
        Ok(Some(uri))
    }

    /// Replace the reader's session with one for `card_uri`
    fn begin_session(&self, reader: &str, generation: u64, card_uri: &Url) -> bool {
        let mut readers = self.readers.lock();
        let Some(slot) = readers.get_mut(reader).filter(|s| s.generation == generation) else {
            return false;
        };

        let carried = slot.session.take().and_then(|mut previous| {
            match self.options.channel_policy {
                ChannelPolicy::ReuseOpen if previous.live_channel().is_some() => {
                    debug!(reader, session_id = %previous.id, "Reusing open state channel");
                    previous.channel.take()
                }
                _ => {
                    previous.close_channel();
                    None
                }
            }
        });

        let session = Session::new(card_uri.clone(), carried);
        info!(reader, session_id = %session.id, uri = %card_uri, "Session started");
        slot.session = Some(session);
        true
    }

    async fn drive_session(
        self: &Arc<Self>,
        reader: &str,
        generation: u64,
        card_uri: &Url,
    ) -> Result<PresentOutcome> {
        let settings = self.settings.load()?;

        if settings.track_card_state {
            if !self.await_initial_snapshot(reader, generation).await {
                return Ok(PresentOutcome::Superseded);
            }
        } else {
            let mut readers = self.readers.lock();
            if let Some(session) = readers.get_mut(reader).and_then(|s| s.session_mut(generation)) {
                session.close_channel();
            }
        }

        // Some(classification) to resume, None to start
        let resume = {
            let mut readers = self.readers.lock();
            let Some(slot) = readers.get_mut(reader).filter(|s| s.owns(generation)) else {
                return Ok(PresentOutcome::Superseded);
            };
            let active = is_active_card(card_uri, slot.binding.as_ref(), slot.play_state.as_ref());
            debug!(reader, active, "Active card check");
            if active && settings.resume_on_card_placement {
                slot.binding.as_ref().map(|b| b.classification.clone())
            } else {
                slot.binding = Some(Binding::new(card_uri.clone()));
                None
            }
        };

        match &resume {
            Some(classification) => {
                info!(reader, classification = classification.label(), "Resuming active card");
                self.player.resume().await?;
            }
            None => {
                info!(reader, uri = %card_uri, "Starting card");
                self.player.start(card_uri).await?;
            }
        }

        let owned = if settings.track_card_state {
            let phase = match &resume {
                Some(classification) => TrackerPhase::after_resume(classification),
                None => TrackerPhase::ResolvingClassification,
            };
            self.attach_tracking(reader, generation, phase)
        } else {
            self.readers
                .lock()
                .get(reader)
                .is_some_and(|s| s.owns(generation))
        };
        if !owned {
            return Ok(PresentOutcome::Superseded);
        }

        Ok(if resume.is_some() {
            PresentOutcome::Resumed
        } else {
            PresentOutcome::Started
        })
    }

    /// Open (or reuse) the session's channel and wait for the first
    /// play-state event; `false` if the placement was superseded
    async fn await_initial_snapshot(&self, reader: &str, generation: u64) -> bool {
        let event_name = self.options.state_event.as_str();
        let (tx, rx) = oneshot::channel::<PlayStateEvent>();
        let tx = Mutex::new(Some(tx));

        let registration = {
            let mut readers = self.readers.lock();
            let Some(session) = readers.get_mut(reader).and_then(|s| s.session_mut(generation)) else {
                return false;
            };

            let channel = match session.live_channel() {
                Some(channel) => channel.clone(),
                None => {
                    let channel = self.connector.connect(self.options.notifications_endpoint.clone());
                    debug!(reader, session_id = %session.id, endpoint = %channel.endpoint(), "State channel opened");
                    session.channel = Some(channel.clone());
                    channel
                }
            };

            // Persistent so a malformed frame does not consume the wait; the
            // listener is removed below once the wait is over
            let reader_name = reader.to_string();
            channel
                .add_listener(event_name, ListenerMode::Persistent, move |event: &ChannelEvent| {
                    let mut tx = tx.lock();
                    if tx.is_none() {
                        return;
                    }
                    match PlayStateEvent::from_json(&event.data) {
                        Ok(state) => {
                            if let Some(tx) = tx.take() {
                                let _ = tx.send(state);
                            }
                        }
                        Err(e) => warn!(
                            reader = %reader_name,
                            error = %ChannelError::Payload(e.to_string()),
                            "Malformed initial snapshot, still waiting"
                        ),
                    }
                })
                .map(|id| (channel, id))
        };

        let snapshot = match registration {
            None => {
                warn!(reader, "State channel unavailable, continuing without snapshot");
                None
            }
            Some((channel, id)) => {
                let received = tokio::time::timeout(self.options.snapshot_timeout, rx).await;
                channel.remove_listener(event_name, id);
                match received {
                    Ok(Ok(event)) => {
                        debug!(reader, state = %event.state, "Initial snapshot received");
                        Some(PlayState::from(&event))
                    }
                    Ok(Err(_)) => {
                        warn!(reader, "State channel ended before the initial snapshot");
                        None
                    }
                    Err(_) => {
                        warn!(
                            reader,
                            error = %BridgeError::SnapshotTimeout(self.options.snapshot_timeout),
                            "init timed out"
                        );
                        None
                    }
                }
            }
        };

        let mut readers = self.readers.lock();
        match readers.get_mut(reader).filter(|s| s.owns(generation)) {
            Some(slot) => {
                slot.play_state = snapshot;
                true
            }
            None => false,
        }
    }

    /// Install the session's persistent listener; `false` if superseded
    fn attach_tracking(self: &Arc<Self>, reader: &str, generation: u64, phase: TrackerPhase) -> bool {
        let mut readers = self.readers.lock();
        let Some(session) = readers.get_mut(reader).and_then(|s| s.session_mut(generation)) else {
            return false;
        };

        if phase.is_closed() {
            info!(reader, session_id = %session.id, "Card matches neither the playing album nor artist");
            session.close_channel();
            return true;
        }

        let Some(channel) = session.live_channel().cloned() else {
            warn!(reader, session_id = %session.id, "State channel lost, card state not tracked");
            session.close_channel();
            return true;
        };

        session.detach_listener(&self.options.state_event);
        let weak: Weak<Self> = Arc::downgrade(self);
        let reader_name = reader.to_string();
        session.listener = channel.add_listener(
            &self.options.state_event,
            ListenerMode::Persistent,
            move |event: &ChannelEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_state_event(&reader_name, generation, event);
                }
            },
        );
        session.phase = phase;
        debug!(reader, session_id = %session.id, phase = ?session.phase, "Tracking card state");
        true
    }

    /// Persistent listener body
    fn on_state_event(&self, reader: &str, generation: u64, event: &ChannelEvent) {
        let payload = match PlayStateEvent::from_json(&event.data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(reader, error = %ChannelError::Payload(e.to_string()), "Ignoring state event");
                return;
            }
        };

        let mut readers = self.readers.lock();
        let Some(slot) = readers.get_mut(reader) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        let Some(session) = slot.session.as_mut() else {
            return;
        };
        if session.phase.is_closed() {
            return;
        }

        slot.play_state = Some(PlayState::from(&payload));
        let transition = session.phase.on_event(&session.card_uri, &payload);

        if let Some(classification) = &transition.resolved {
            match classification {
                Classification::Album { .. } => {
                    info!(reader, title = %payload.display_title(), "Album tag placed")
                }
                Classification::Artist { .. } => {
                    info!(reader, title = %payload.display_title(), "Artist tag placed")
                }
                _ => info!(reader, "Card matches neither the playing album nor artist"),
            }
            if let Some(binding) = slot
                .binding
                .as_mut()
                .filter(|b| b.uri == session.card_uri)
            {
                binding.classification = classification.clone();
            }
        }

        session.phase = transition.next;
        if let Some(reason) = transition.close {
            match &reason {
                CloseReason::PlaybackStopped => info!(reader, "Playback stopped"),
                CloseReason::AlbumChanged { now_playing } => {
                    info!(reader, now_playing = %now_playing, "album changed")
                }
                CloseReason::ArtistChanged { now_playing } => {
                    info!(reader, now_playing = %now_playing, "artist changed")
                }
                CloseReason::Unmatched => {}
            }
            session.close_channel();
            debug!(reader, session_id = %session.id, ?reason, "Stopped tracking");
        }
    }

    /// End the reader's session; `Some(active)` if there was one
    fn end_session(&self, reader: &str) -> Option<bool> {
        let mut readers = self.readers.lock();
        let slot = readers.get_mut(reader)?;
        slot.generation += 1;
        let mut session = slot.session.take()?;

        let active = is_active_card(&session.card_uri, slot.binding.as_ref(), slot.play_state.as_ref());
        session.close_channel();
        info!(reader, session_id = %session.id, active, "Session ended");
        Some(active)
    }

    /// A placement failed after its session began; the card is still on the
    /// reader so the record stays, but tracking stops
    fn abort_session(&self, reader: &str, generation: u64) {
        let mut readers = self.readers.lock();
        if let Some(session) = readers.get_mut(reader).and_then(|s| s.session_mut(generation)) {
            session.close_channel();
            debug!(reader, session_id = %session.id, "Session tracking aborted");
        }
    }
}
