//! Bot configuration loaded from TOML, with environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file cannot be parsed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config cannot be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub endpoint: EndpointConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub transcoder: TranscoderConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Control channel address of the voice endpoint.
    pub address: String,
    pub user_id: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9001".to_string(),
            user_id: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Opus bitrate in bits per second.
    pub bitrate: i32,
    /// Initial playback gain, 0.0 to 1.5.
    pub volume: f32,
    /// Encoded frames buffered ahead of the pacer.
    pub lookahead_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bitrate: 96_000,
            volume: 0.5,
            lookahead_frames: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub handshake_timeout_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub max_missed_heartbeats: u32,
    pub keepalive_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            reconnect_attempts: 5,
            reconnect_backoff_ms: 1_000,
            reconnect_backoff_max_ms: 8_000,
            max_missed_heartbeats: 3,
            keepalive_interval_ms: 5_000,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// At least 1 ms.
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }

    /// Delay before reconnect `attempt` (1-based): doubles each time, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .reconnect_backoff_ms
            .saturating_mul(factor)
            .min(self.reconnect_backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub ffmpeg_path: String,
    /// Arguments placed before `-i` for network inputs.
    pub before_options: Vec<String>,
    /// Arguments placed after `-i`, before the fixed output format.
    pub options: Vec<String>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        let args = |list: &[&str]| list.iter().map(ToString::to_string).collect();
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            before_options: args(&[
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ]),
            options: args(&["-vn"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_track_length_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_track_length_secs: 4 * 60 * 60,
            idle_timeout_secs: 180,
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn max_track_length(&self) -> Duration {
        Duration::from_secs(self.max_track_length_secs)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn env_override<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl BotConfig {
    /// Loads the config at `path`, writing defaults there if it does not exist.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or created.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file not found, creating default at {:?}", path);
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// # Errors
    /// Returns error if the config cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Applies `VOICEBOT_ENDPOINT`, `VOICEBOT_USER_ID` and `VOICEBOT_FFMPEG`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(address) = env_override("VOICEBOT_ENDPOINT") {
            self.endpoint.address = address;
        }
        if let Some(user_id) = env_override("VOICEBOT_USER_ID") {
            self.endpoint.user_id = user_id;
        }
        if let Some(path) = env_override("VOICEBOT_FFMPEG") {
            self.transcoder.ffmpeg_path = path;
        }
        self
    }
}
