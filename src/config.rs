//! Persistent application configuration model and defaults.

use std::path::PathBuf;

use crate::protocol::PlaybackRate;

/// Root configuration persisted to `audioshelf.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Catalog storage preferences.
    pub library: LibraryConfig,
    #[serde(default)]
    /// Transport defaults and step sizes.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Log output preferences.
    pub logging: LoggingConfig,
}

/// Catalog storage preferences.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryConfig {
    /// Explicit database location. Falls back to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl LibraryConfig {
    /// Resolves the database file, preferring the configured path.
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Transport defaults and step sizes used by the front end.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_initial_volume")]
    pub initial_volume: f32,
    #[serde(default = "default_initial_rate")]
    pub initial_rate: f32,
    #[serde(default = "default_volume_step")]
    pub volume_step: f32,
    #[serde(default = "default_seek_step_ms")]
    pub seek_step_ms: u64,
    /// How often the output reports the playhead while playing.
    #[serde(default = "default_position_interval_ms")]
    pub position_interval_ms: u64,
}

/// Log output preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            initial_volume: default_initial_volume(),
            initial_rate: default_initial_rate(),
            volume_step: default_volume_step(),
            seek_step_ms: default_seek_step_ms(),
            position_interval_ms: default_position_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PlaybackConfig {
    /// The configured start rate as one of the supported speeds.
    pub fn initial_playback_rate(&self) -> PlaybackRate {
        PlaybackRate::nearest(self.initial_rate)
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

fn default_initial_volume() -> f32 {
    0.5
}

fn default_initial_rate() -> f32 {
    1.0
}

fn default_volume_step() -> f32 {
    0.1
}

fn default_seek_step_ms() -> u64 {
    10_000
}

fn default_position_interval_ms() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audioshelf")
        .join("library.db")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audioshelf.toml")
}

/// Clamps every value into the range the runtime accepts.
pub fn sanitize_config(config: Config) -> Config {
    let volume_step = if config.playback.volume_step.is_finite() && config.playback.volume_step > 0.0 {
        config.playback.volume_step.min(1.0)
    } else {
        default_volume_step()
    };
    let initial_volume = if config.playback.initial_volume.is_finite() {
        config.playback.initial_volume.clamp(0.0, 1.0)
    } else {
        default_initial_volume()
    };

    Config {
        library: config.library,
        playback: PlaybackConfig {
            initial_volume,
            initial_rate: PlaybackRate::nearest(config.playback.initial_rate).as_f32(),
            volume_step,
            seek_step_ms: config.playback.seek_step_ms.clamp(1_000, 600_000),
            position_interval_ms: config.playback.position_interval_ms.clamp(20, 5_000),
        },
        logging: config.logging,
    }
}
