//! In-process fakes for the engine's capabilities

use async_trait::async_trait;
use parking_lot::Mutex;
use pnfc_bridge::channel::{ChannelConnector, ChannelEvent, StateChannel};
use pnfc_bridge::engine::{EngineOptions, ReconciliationEngine};
use pnfc_bridge::player::{CommandError, PlayerController};
use pnfc_bridge::reader::{CardInfo, MemoryTag};
use pnfc_bridge::tag::{build_uri_image, Type2TagDecoder};
use pnfc_common::config::ChannelPolicy;
use pnfc_common::{Settings, SettingsSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const READER: &str = "ACS ACR122U PICC Interface";
pub const ALBUM_URI: &str = "https://listen.plex.tv/player?play=/library/albums/10";
pub const STATE: &str = "state";
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    Start(String),
    Pause,
    Resume,
}

/// Records every command; can be switched to fail them
#[derive(Default)]
pub struct RecordingPlayer {
    commands: Mutex<Vec<PlayerCommand>>,
    failing: AtomicBool,
}

impl RecordingPlayer {
    pub fn commands(&self) -> Vec<PlayerCommand> {
        self.commands.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, command: PlayerCommand) -> Result<(), CommandError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CommandError::Rejected {
                status: 500,
                body: "player offline".to_string(),
            });
        }
        self.commands.lock().push(command);
        Ok(())
    }
}

#[async_trait]
impl PlayerController for RecordingPlayer {
    async fn start(&self, uri: &Url) -> Result<(), CommandError> {
        self.record(PlayerCommand::Start(uri.to_string()))
    }

    async fn pause(&self) -> Result<(), CommandError> {
        self.record(PlayerCommand::Pause)
    }

    async fn resume(&self) -> Result<(), CommandError> {
        self.record(PlayerCommand::Resume)
    }
}

/// Hands out open in-memory channels; tests dispatch into them directly
#[derive(Default)]
pub struct ManualConnector {
    channels: Mutex<Vec<StateChannel>>,
}

impl ManualConnector {
    pub fn channels(&self) -> Vec<StateChannel> {
        self.channels.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.channels().iter().filter(|c| c.is_live()).count()
    }

    /// Wait until channel `index` exists and has `count` listeners on `event`
    pub async fn wait_for_listeners(&self, index: usize, event: &str, count: usize) -> StateChannel {
        for _ in 0..400 {
            if let Some(channel) = self.channels.lock().get(index).cloned() {
                if channel.listener_count(event) == count {
                    return channel;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("channel {} never reached {} listener(s) on '{}'", index, count, event);
    }
}

impl ChannelConnector for ManualConnector {
    fn connect(&self, endpoint: Url) -> StateChannel {
        let channel = StateChannel::new(endpoint);
        channel.mark_open();
        self.channels.lock().push(channel.clone());
        channel
    }
}

/// Settings that tests flip between events
pub struct SwitchableSettings {
    current: Mutex<Settings>,
}

impl SwitchableSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: Mutex::new(settings),
        }
    }

    pub fn update(&self, change: impl FnOnce(&mut Settings)) {
        change(&mut self.current.lock());
    }
}

impl SettingsSource for SwitchableSettings {
    fn load(&self) -> pnfc_common::Result<Settings> {
        Ok(*self.current.lock())
    }
}

pub fn settings(pause: bool, resume: bool, track: bool) -> Settings {
    Settings {
        pause_on_card_removal: pause,
        resume_on_card_placement: resume,
        track_card_state: track,
    }
}

/// Engine wired to fakes
pub struct TestBridge {
    pub engine: ReconciliationEngine,
    pub player: Arc<RecordingPlayer>,
    pub connector: Arc<ManualConnector>,
    pub settings: Arc<SwitchableSettings>,
}

impl TestBridge {
    pub fn new(settings: Settings) -> Self {
        Self::with_policy(settings, ChannelPolicy::ReopenPerPlacement)
    }

    pub fn with_policy(settings: Settings, channel_policy: ChannelPolicy) -> Self {
        let player = Arc::new(RecordingPlayer::default());
        let connector = Arc::new(ManualConnector::default());
        let settings = Arc::new(SwitchableSettings::new(settings));
        let engine = ReconciliationEngine::new(
            Arc::new(Type2TagDecoder),
            player.clone(),
            connector.clone(),
            settings.clone(),
            EngineOptions {
                notifications_endpoint: Url::parse("http://127.0.0.1:32500/:/eventsource/notifications")
                    .unwrap(),
                state_event: STATE.to_string(),
                snapshot_timeout: SNAPSHOT_TIMEOUT,
                channel_policy,
            },
        );

        Self {
            engine,
            player,
            connector,
            settings,
        }
    }
}

pub fn card() -> CardInfo {
    CardInfo::new("04A1B28F", "TAG_ISO_14443_3")
}

pub fn uri_tag(uri: &str) -> MemoryTag {
    MemoryTag::new(build_uri_image(uri, &[0x04, 0xA1, 0xB2, 0x8F]))
}

pub fn state_event(json: &str) -> ChannelEvent {
    ChannelEvent::new(STATE, json)
}
