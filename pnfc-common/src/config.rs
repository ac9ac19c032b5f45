//! Service configuration loading
//!
//! Values are resolved per field in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file at the default location is not an error; the bridge
//! starts with compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const ENV_CONFIG: &str = "PNFC_CONFIG";
pub const ENV_PLAYER_URI: &str = "PNFC_PLAYER_URI";
pub const ENV_SETTINGS: &str = "PNFC_SETTINGS";
pub const ENV_LOG_LEVEL: &str = "PNFC_LOG_LEVEL";

pub const DEFAULT_PLAYER_URI: &str = "http://127.0.0.1:32500";
pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";
pub const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_NOTIFICATIONS_PATH: &str = "/:/eventsource/notifications";
pub const DEFAULT_STATE_EVENT: &str = "state";
pub const DEFAULT_CLIENT_IDENTIFIER: &str = "pnfc-bridge";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// What happens to an open state channel when a token is placed again
/// without having been removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelPolicy {
    /// Close the previous subscription and open a fresh one
    #[default]
    ReopenPerPlacement,
    /// Keep a still-open subscription and only swap its listeners
    ReuseOpen,
}

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TomlConfig {
    pub player_uri: Option<String>,
    pub settings_path: Option<PathBuf>,
    pub snapshot_timeout_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub notifications_path: Option<String>,
    pub state_event: Option<String>,
    pub channel_policy: Option<ChannelPolicy>,
    pub client_identifier: Option<String>,
    pub log_level: Option<String>,
}

impl TomlConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load a config file; `Ok(None)` when it does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map(Some)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub player_uri: Option<String>,
    pub settings_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Fully resolved bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URI of the headless player (scheme, host, port)
    pub player_uri: Url,
    /// Location of the user settings document
    pub settings_path: PathBuf,
    /// How long to wait for the first playback snapshot after subscribing
    pub snapshot_timeout: Duration,
    /// Per-request timeout for player commands
    pub command_timeout: Duration,
    /// Path of the player's server-sent event stream
    pub notifications_path: String,
    /// Event name carrying playback state on that stream
    pub state_event: String,
    pub channel_policy: ChannelPolicy,
    /// Sent to the player as `X-Plex-Client-Identifier`
    pub client_identifier: String,
    pub log_level: String,
}

impl BridgeConfig {
    /// Resolve configuration from CLI overrides, environment and config file
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let explicit = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));

        let file = match explicit {
            Some(path) => {
                let config = TomlConfig::load(&path)?.ok_or_else(|| {
                    Error::Config(format!("Config file not found: {}", path.display()))
                })?;
                info!(path = %path.display(), "Loaded config file");
                config
            }
            None => match default_config_path() {
                Some(path) => {
                    let config = TomlConfig::load(&path)?.unwrap_or_default();
                    info!(path = %path.display(), "Loaded config file");
                    config
                }
                None => {
                    debug!("No config file found, using defaults");
                    TomlConfig::default()
                }
            },
        };

        Self::from_sources(overrides, &file)
    }

    /// Merge CLI overrides, environment and an already-parsed file
    pub fn from_sources(overrides: &ConfigOverrides, file: &TomlConfig) -> Result<Self> {
        let player_uri = overrides
            .player_uri
            .clone()
            .or_else(|| env_string(ENV_PLAYER_URI))
            .or_else(|| file.player_uri.clone())
            .unwrap_or_else(|| DEFAULT_PLAYER_URI.to_string());
        let player_uri = parse_player_uri(&player_uri)?;

        let settings_path = overrides
            .settings_path
            .clone()
            .or_else(|| env_string(ENV_SETTINGS).map(PathBuf::from))
            .or_else(|| file.settings_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));

        let log_level = overrides
            .log_level
            .clone()
            .or_else(|| env_string(ENV_LOG_LEVEL))
            .or_else(|| file.log_level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let snapshot_timeout_ms = file
            .snapshot_timeout_ms
            .unwrap_or(DEFAULT_SNAPSHOT_TIMEOUT_MS);
        if snapshot_timeout_ms == 0 {
            return Err(Error::Config(
                "snapshot_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let command_timeout_ms = file.command_timeout_ms.unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS);
        if command_timeout_ms == 0 {
            return Err(Error::Config(
                "command_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let notifications_path = file
            .notifications_path
            .clone()
            .unwrap_or_else(|| DEFAULT_NOTIFICATIONS_PATH.to_string());
        if !notifications_path.starts_with('/') {
            return Err(Error::Config(format!(
                "notifications_path must start with '/': {}",
                notifications_path
            )));
        }

        let state_event = file
            .state_event
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_STATE_EVENT.to_string());

        Ok(Self {
            player_uri,
            settings_path,
            snapshot_timeout: Duration::from_millis(snapshot_timeout_ms),
            command_timeout: Duration::from_millis(command_timeout_ms),
            notifications_path,
            state_event,
            channel_policy: file.channel_policy.unwrap_or_default(),
            client_identifier: file
                .client_identifier
                .clone()
                .unwrap_or_else(|| DEFAULT_CLIENT_IDENTIFIER.to_string()),
            log_level,
        })
    }

    /// Full URI of the player's notification stream
    pub fn notifications_endpoint(&self) -> Result<Url> {
        self.player_uri
            .join(&self.notifications_path)
            .map_err(|e| Error::Config(format!("Invalid notifications path: {}", e)))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_player_uri(raw: &str) -> Result<Url> {
    let uri = Url::parse(raw)
        .map_err(|e| Error::Config(format!("Invalid player URI {}: {}", raw, e)))?;
    match uri.scheme() {
        "http" | "https" => Ok(uri),
        other => Err(Error::Config(format!(
            "Unsupported player URI scheme: {}",
            other
        ))),
    }
}

/// Default configuration file path for the platform, if one exists
///
/// Linux checks `~/.config/pnfc/config.toml` first, then `/etc/pnfc/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("pnfc").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/pnfc/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_policy_names() {
        let config = TomlConfig::parse(r#"channel_policy = "reuse-open""#).unwrap();
        assert_eq!(config.channel_policy, Some(ChannelPolicy::ReuseOpen));

        let config = TomlConfig::parse(r#"channel_policy = "reopen-per-placement""#).unwrap();
        assert_eq!(config.channel_policy, Some(ChannelPolicy::ReopenPerPlacement));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(TomlConfig::parse("player = \"http://x\"").is_err());
    }

    #[test]
    fn test_parse_player_uri_scheme() {
        assert!(parse_player_uri("http://localhost:32500").is_ok());
        assert!(parse_player_uri("ftp://localhost").is_err());
        assert!(parse_player_uri("not a uri").is_err());
    }
}
