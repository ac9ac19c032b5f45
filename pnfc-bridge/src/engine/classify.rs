//! Card classification and the active-card decision

use percent_encoding::percent_decode_str;
use pnfc_common::{MetadataKey, PlayState, PlayStateEvent, PlaybackStatus};
use url::Url;

/// What level of content a card is bound to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Classification {
    /// No qualifying playback observed yet
    #[default]
    Unresolved,
    /// Resolved: the card names neither the playing album nor its artist
    Unmatched,
    Album { parent_key: MetadataKey },
    Artist { grandparent_key: MetadataKey },
}

impl Classification {
    /// Resolved to album or artist; such a classification is never revised
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Album { .. } | Self::Artist { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Unmatched => "none",
            Self::Album { .. } => "album",
            Self::Artist { .. } => "artist",
        }
    }
}

/// Last-applied card URI and what it was classified as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub uri: Url,
    pub classification: Classification,
}

impl Binding {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            classification: Classification::Unresolved,
        }
    }
}

/// Whether the player is still playing what `card_uri` stands for
///
/// The card must be the last-applied one; a bound classification further
/// requires the player's current key to equal the resolved key.
pub fn is_active_card(card_uri: &Url, binding: Option<&Binding>, play_state: Option<&PlayState>) -> bool {
    let Some(binding) = binding else {
        return false;
    };
    if *card_uri != binding.uri {
        return false;
    }

    match &binding.classification {
        Classification::Album { parent_key } => {
            play_state.and_then(|p| p.parent_key.as_ref()) == Some(parent_key)
        }
        Classification::Artist { grandparent_key } => {
            play_state.and_then(|p| p.grandparent_key.as_ref()) == Some(grandparent_key)
        }
        Classification::Unresolved | Classification::Unmatched => true,
    }
}

/// Classify a card against a reported playback state
///
/// Returns `None` while the event does not qualify (not playing, or either
/// key missing). Album wins when both keys appear in the card's query.
pub fn classify(card_uri: &Url, event: &PlayStateEvent) -> Option<Classification> {
    if event.state != PlaybackStatus::Playing {
        return None;
    }
    let parent_key = event.parent_key.as_ref()?;
    let grandparent_key = event.grandparent_key.as_ref()?;

    let query = card_uri.query().unwrap_or("");
    let decoded = percent_decode_str(query).decode_utf8_lossy();

    let classification = if contains_segment(&decoded, parent_key.as_str()) {
        Classification::Album {
            parent_key: parent_key.clone(),
        }
    } else if contains_segment(&decoded, grandparent_key.as_str()) {
        Classification::Artist {
            grandparent_key: grandparent_key.clone(),
        }
    } else {
        Classification::Unmatched
    };
    Some(classification)
}

fn is_separator(c: char) -> bool {
    matches!(c, '/' | '=' | '&' | '?' | ':' | ',')
}

/// `key` occurs in `haystack` aligned to path-segment boundaries
fn contains_segment(haystack: &str, key: &str) -> bool {
    if key.is_empty() {
        return false;
    }

    haystack.match_indices(key).any(|(start, _)| {
        let end = start + key.len();
        let before = key.starts_with('/')
            || haystack[..start].chars().next_back().map_or(true, is_separator);
        let after = key.ends_with('/') || haystack[end..].chars().next().map_or(true, is_separator);
        before && after
    })
}
