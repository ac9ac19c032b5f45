//! Per-session tracking of the player's reported state
//!
//! A session's tracker is a pure state machine fed with play-state events:
//!
//! ```text
//! AwaitingInit ──start──▶ ResolvingClassification ──album|artist──▶ Tracking
//!      │                          │                                    │
//!      └──resume(bound)──▶ Tracking                 none│       stopped|changed
//!                                 ▼                    ▼               ▼
//!                               Closed ◀───────────────┴───────────────┘
//! ```
//!
//! The engine applies each [`Transition`] under its lock and closes the
//! channel when `close` is set.

use pnfc_common::{PlayStateEvent, PlaybackStatus};
use url::Url;

use super::classify::{classify, Classification};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackerPhase {
    /// Waiting for the initial snapshot
    #[default]
    AwaitingInit,
    /// Started a card; waiting for qualifying playback to classify it
    ResolvingClassification,
    /// Watching for playback moving away from the bound key
    Tracking(Classification),
    /// Channel closed; no further events are processed
    Closed,
}

/// Why tracking ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Card matched neither the playing album nor artist
    Unmatched,
    PlaybackStopped,
    AlbumChanged { now_playing: String },
    ArtistChanged { now_playing: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: TrackerPhase,
    /// Set when this event resolved the card's classification
    pub resolved: Option<Classification>,
    pub close: Option<CloseReason>,
}

impl Transition {
    fn stay(phase: &TrackerPhase) -> Self {
        Self {
            next: phase.clone(),
            resolved: None,
            close: None,
        }
    }

    fn close(reason: CloseReason) -> Self {
        Self {
            next: TrackerPhase::Closed,
            resolved: None,
            close: Some(reason),
        }
    }
}

impl TrackerPhase {
    /// Phase after resuming a card with a known classification
    pub fn after_resume(classification: &Classification) -> Self {
        match classification {
            Classification::Album { .. } | Classification::Artist { .. } => {
                Self::Tracking(classification.clone())
            }
            Classification::Unresolved => Self::ResolvingClassification,
            Classification::Unmatched => Self::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Apply one play-state event
    pub fn on_event(&self, card_uri: &Url, event: &PlayStateEvent) -> Transition {
        match self {
            Self::AwaitingInit | Self::Closed => Transition::stay(self),

            Self::ResolvingClassification => match classify(card_uri, event) {
                None => Transition::stay(self),
                Some(Classification::Unmatched) => Transition {
                    next: Self::Closed,
                    resolved: Some(Classification::Unmatched),
                    close: Some(CloseReason::Unmatched),
                },
                Some(bound) => Transition {
                    next: Self::Tracking(bound.clone()),
                    resolved: Some(bound),
                    close: None,
                },
            },

            Self::Tracking(classification) => {
                if event.state == PlaybackStatus::Stopped {
                    return Transition::close(CloseReason::PlaybackStopped);
                }
                match classification {
                    Classification::Album { parent_key } => match &event.parent_key {
                        Some(key) if key != parent_key => {
                            Transition::close(CloseReason::AlbumChanged {
                                now_playing: event.display_title(),
                            })
                        }
                        _ => Transition::stay(self),
                    },
                    Classification::Artist { grandparent_key } => match &event.grandparent_key {
                        Some(key) if key != grandparent_key => {
                            Transition::close(CloseReason::ArtistChanged {
                                now_playing: event.display_title(),
                            })
                        }
                        _ => Transition::stay(self),
                    },
                    Classification::Unresolved | Classification::Unmatched => Transition::stay(self),
                }
            }
        }
    }
}
