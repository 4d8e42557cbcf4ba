//! Configuration management for huddle
//!
//! Provides loading, saving and validation of transport credentials, ICE
//! settings, media constraints and chat defaults. Files are TOML; a layered
//! loader can overlay `HUDDLE__SECTION__KEY` environment variables.

use crate::errors::CallError;
use crate::media::MediaConstraints;
use crate::session::{JoinOptions, DEFAULT_CHANNEL};
use crate::webrtc::{IceTransportPolicy, RTCConfiguration};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuddleConfig {
    pub transport: TransportConfig,
    pub ice: RTCConfiguration,
    pub media: MediaConstraints,
    pub chat: ChatConfig,
}

/// Pub/sub transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Key used to subscribe to channels
    pub subscribe_key: String,
    /// Key used to publish to channels
    pub publish_key: String,
    /// Presence heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Resubscribe after a network interruption
    pub restore: bool,
    /// Reconnect automatically when the network comes back
    pub auto_network_detection: bool,
}

/// Chat settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Channel joined when none is given
    pub default_channel: String,
}

impl Default for HuddleConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                subscribe_key: "demo".to_string(),
                publish_key: "demo".to_string(),
                heartbeat_interval_secs: 10,
                restore: true,
                auto_network_detection: true,
            },
            ice: RTCConfiguration::default(),
            media: MediaConstraints::default(),
            chat: ChatConfig {
                default_channel: DEFAULT_CHANNEL.to_string(),
            },
        }
    }
}

impl HuddleConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CallError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CallError::Config(format!("Failed to read config file: {}", e)))?;

        let config: HuddleConfig = toml::from_str(&contents)
            .map_err(|e| CallError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load defaults, then the file at `path` if present, then any
    /// `HUDDLE__SECTION__KEY` environment variables.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, CallError> {
        let path = path.as_ref();
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| CallError::Config(format!("Failed to build defaults: {}", e)))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(false),
            )
            .add_source(
                config::Environment::with_prefix("HUDDLE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CallError::Config(format!("Failed to load configuration: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| CallError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CallError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CallError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CallError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CallError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("huddle.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Options for joining `channel`, or the configured default channel.
    pub fn join_options(&self, channel: Option<&str>) -> JoinOptions {
        JoinOptions {
            channel: channel.unwrap_or(&self.chat.default_channel).to_string(),
            rtc: self.ice.clone(),
            constraints: self.media,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.transport.subscribe_key.trim().is_empty() {
            return Err("Subscribe key must not be empty".to_string());
        }
        if self.transport.publish_key.trim().is_empty() {
            return Err("Publish key must not be empty".to_string());
        }
        if self.transport.heartbeat_interval_secs == 0 || self.transport.heartbeat_interval_secs > 300 {
            return Err("Heartbeat interval must be between 1 and 300 seconds".to_string());
        }

        for server in &self.ice.ice_servers {
            if server.urls.is_empty() {
                return Err("ICE server entry has no URLs".to_string());
            }
            if let Some(url) = server
                .urls
                .iter()
                .find(|u| !["stun:", "turn:", "turns:"].iter().any(|scheme| u.starts_with(scheme)))
            {
                return Err(format!("Unsupported ICE server URL: {}", url));
            }
        }
        let has_relay = self
            .ice
            .ice_servers
            .iter()
            .flat_map(|s| s.urls.iter())
            .any(|u| u.starts_with("turn"));
        if self.ice.ice_transport_policy == IceTransportPolicy::Relay && !has_relay {
            return Err("Relay-only ICE policy requires a TURN server".to_string());
        }

        if !self.media.audio && !self.media.video {
            return Err("At least one of audio or video must be enabled".to_string());
        }

        if self.chat.default_channel.chars().any(char::is_whitespace) {
            return Err("Default channel must not contain whitespace".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::IceServer;

    #[test]
    fn test_default_config() {
        let config = HuddleConfig::default();
        assert_eq!(config.chat.default_channel, "default");
        assert_eq!(config.transport.heartbeat_interval_secs, 10);
        assert!(config.media.audio && config.media.video);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad_heartbeat = HuddleConfig::default();
        bad_heartbeat.transport.heartbeat_interval_secs = 0;
        assert!(bad_heartbeat.validate().is_err());

        let mut no_media = HuddleConfig::default();
        no_media.media.audio = false;
        no_media.media.video = false;
        assert!(no_media.validate().is_err());

        let mut bad_url = HuddleConfig::default();
        bad_url.ice.ice_servers[0].urls = vec!["http://example.com".to_string()];
        assert!(bad_url.validate().unwrap_err().contains("http://example.com"));
    }

    #[test]
    fn test_relay_policy_needs_turn() {
        let mut config = HuddleConfig::default();
        config.ice.ice_transport_policy = IceTransportPolicy::Relay;
        assert!(config.validate().is_err());

        config.ice.ice_servers.push(IceServer {
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: Some("user".to_string()),
            credential: Some("secret".to_string()),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("huddle.toml");

        let mut config = HuddleConfig::default();
        config.chat.default_channel = "standup".to_string();
        config.media.video = false;
        config.save_to_file(&config_path).unwrap();

        let loaded = HuddleConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&HuddleConfig::default()).unwrap();

        assert!(toml_string.contains("[transport]"));
        assert!(toml_string.contains("[media]"));
        assert!(toml_string.contains("[chat]"));
        assert!(toml_string.contains("ice_transport_policy = \"all\""));
        assert!(toml_string.contains("heartbeat_interval_secs"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = HuddleConfig::load_from_file("nonexistent_file.toml").unwrap();
        assert_eq!(config, HuddleConfig::default());
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.toml");
        fs::write(&path, "[transport\nsubscribe_key = ").unwrap();

        let err = HuddleConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, CallError::Config(_)));
    }

    #[test]
    fn test_layered_load_overlays_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.toml");
        let mut config = HuddleConfig::default();
        config.chat.default_channel = "from-file".to_string();
        config.save_to_file(&path).unwrap();

        std::env::set_var("HUDDLE__TRANSPORT__HEARTBEAT_INTERVAL_SECS", "42");
        let loaded = HuddleConfig::load_layered(&path);
        std::env::remove_var("HUDDLE__TRANSPORT__HEARTBEAT_INTERVAL_SECS");

        let loaded = loaded.unwrap();
        assert_eq!(loaded.chat.default_channel, "from-file");
        assert_eq!(loaded.transport.heartbeat_interval_secs, 42);
        assert_eq!(loaded.ice, config.ice);
    }

    #[test]
    fn test_join_options_fall_back_to_default_channel() {
        let config = HuddleConfig::default();
        assert_eq!(config.join_options(None).channel, "default");
        assert_eq!(config.join_options(Some("ops")).channel, "ops");
    }
}
