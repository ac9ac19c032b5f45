//! Per-reader bookkeeping
//!
//! A reader's slot outlives its sessions: the binding and last play state
//! stay behind after a card is removed so the same card can be resumed later.
//! Every channel a session opens is stored on the session record as soon as
//! it is opened, so whoever ends the session closes it.

use pnfc_common::PlayState;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::classify::Binding;
use super::tracker::TrackerPhase;
use crate::channel::{ConnectionState, ListenerId, StateChannel};

/// One placement of a card on a reader
#[derive(Debug)]
pub(crate) struct Session {
    pub id: Uuid,
    pub card_uri: Url,
    pub channel: Option<StateChannel>,
    /// Persistent tracking listener on `channel`
    pub listener: Option<ListenerId>,
    pub phase: TrackerPhase,
}

impl Session {
    pub fn new(card_uri: Url, channel: Option<StateChannel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            card_uri,
            channel,
            listener: None,
            phase: TrackerPhase::AwaitingInit,
        }
    }

    /// Live channel owned by this session, if any
    pub fn live_channel(&self) -> Option<&StateChannel> {
        self.channel.as_ref().filter(|c| c.is_live())
    }

    /// Remove the tracking listener, leaving the channel open
    pub fn detach_listener(&mut self, event: &str) {
        if let (Some(channel), Some(id)) = (&self.channel, self.listener.take()) {
            channel.remove_listener(event, id);
        }
    }

    /// Close and forget the channel; returns whether one was live
    pub fn close_channel(&mut self) -> bool {
        self.listener = None;
        self.phase = TrackerPhase::Closed;
        match self.channel.take() {
            Some(channel) => {
                let closed = channel.close();
                if closed {
                    debug!(session_id = %self.id, "State channel closed");
                }
                closed
            }
            None => false,
        }
    }
}

/// Everything the engine keeps for one reader
#[derive(Debug, Default)]
pub(crate) struct ReaderSlot {
    /// Bumped whenever a session begins or ends; handlers holding an older
    /// value no longer own the reader
    pub generation: u64,
    pub session: Option<Session>,
    pub binding: Option<Binding>,
    pub play_state: Option<PlayState>,
}

impl ReaderSlot {
    pub fn owns(&self, generation: u64) -> bool {
        self.generation == generation && self.session.is_some()
    }

    pub fn session_mut(&mut self, generation: u64) -> Option<&mut Session> {
        if self.generation == generation {
            self.session.as_mut()
        } else {
            None
        }
    }
}

/// Point-in-time view of a reader, for logging and inspection
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSnapshot {
    pub session_id: Option<Uuid>,
    pub card_uri: Option<Url>,
    pub phase: Option<TrackerPhase>,
    pub channel_state: Option<ConnectionState>,
    pub binding: Option<Binding>,
    pub play_state: Option<PlayState>,
    /// Whether the card on the reader (if any) is the active card
    pub active: bool,
}

impl ReaderSnapshot {
    pub(crate) fn of(slot: &ReaderSlot) -> Self {
        let session = slot.session.as_ref();
        let active = session.is_some_and(|s| {
            super::classify::is_active_card(&s.card_uri, slot.binding.as_ref(), slot.play_state.as_ref())
        });
        Self {
            session_id: session.map(|s| s.id),
            card_uri: session.map(|s| s.card_uri.clone()),
            phase: session.map(|s| s.phase.clone()),
            channel_state: session.and_then(|s| s.channel.as_ref()).map(StateChannel::state),
            binding: slot.binding.clone(),
            play_state: slot.play_state.clone(),
            active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ListenerMode;

    fn card() -> Url {
        Url::parse("https://listen.plex.tv/player?play=/library/albums/10").unwrap()
    }

    fn channel() -> StateChannel {
        StateChannel::new(Url::parse("http://127.0.0.1:32500/events").unwrap())
    }

    #[test]
    fn test_generation_ownership() {
        let mut slot = ReaderSlot::default();
        assert!(!slot.owns(0));

        slot.generation = 3;
        slot.session = Some(Session::new(card(), None));
        assert!(slot.owns(3));
        assert!(!slot.owns(2));
        assert!(slot.session_mut(3).is_some());
        assert!(slot.session_mut(4).is_none());
    }

    #[test]
    fn test_close_channel_once() {
        let ch = channel();
        let mut session = Session::new(card(), Some(ch.clone()));
        assert!(session.live_channel().is_some());

        assert!(session.close_channel());
        assert!(!ch.is_live());
        assert!(session.channel.is_none());
        assert!(session.phase.is_closed());
        assert!(!session.close_channel());
    }

    #[test]
    fn test_detach_listener_keeps_channel() {
        let ch = channel();
        let mut session = Session::new(card(), Some(ch.clone()));
        session.listener = ch.add_listener("state", ListenerMode::Persistent, |_| {});
        assert_eq!(ch.listener_count("state"), 1);

        session.detach_listener("state");
        assert_eq!(ch.listener_count("state"), 0);
        assert!(ch.is_live());
        assert!(session.listener.is_none());
    }
}
