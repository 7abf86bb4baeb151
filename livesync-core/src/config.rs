use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::continuity::ContinuityMode;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channel: ChannelConfig,
    pub watchdog: WatchdogConfig,
    pub player: PlayerConfig,
    pub logging: LoggingConfig,
}

/// Push-channel heartbeat and reconnection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Silence longer than this is treated as connection death
    pub heartbeat_timeout_ms: u64,
    /// First reconnect delay
    pub initial_backoff_ms: u64,
    /// Reconnect delay cap (there is no retry cap, only a delay cap)
    pub max_backoff_ms: u64,
    /// Uniform jitter applied to each delay, as a fraction (0.3 = ±30%)
    pub jitter_pct: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 45_000,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            jitter_pct: 0.3,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Live-playback latency watchdog tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// How often the player is sampled while playing
    pub poll_interval_ms: u64,
    /// Latency at which a cheap seek-to-live is issued
    pub seek_threshold_sec: f64,
    /// Latency at which a full stream reload is issued
    pub reload_threshold_sec: f64,
    /// Minimum spacing between reloads (prevents reload storms)
    pub reload_cooldown_ms: u64,
    /// Continuous buffering longer than this triggers an immediate re-evaluation
    pub buffering_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            seek_threshold_sec: 8.0,
            reload_threshold_sec: 20.0,
            reload_cooldown_ms: 30_000,
            buffering_timeout_ms: 8_000,
        }
    }
}

impl WatchdogConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn reload_cooldown(&self) -> Duration {
        Duration::from_millis(self.reload_cooldown_ms)
    }

    #[must_use]
    pub const fn buffering_timeout(&self) -> Duration {
        Duration::from_millis(self.buffering_timeout_ms)
    }
}

/// Player-side behavior that is selected by configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// How the player keeps signal flowing while the tab is hidden
    pub continuity: ContinuityMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" (production) or "pretty" (development)
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file, overlaid with
    /// `LIVESYNC__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("LIVESYNC")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
