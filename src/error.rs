//! Error types shared by the catalog, playback and configuration layers.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the library store and the catalog operations built on it.
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Playlist name already in use: {name}")]
    Conflict { name: String },
}

impl LibraryError {
    pub(crate) fn track_not_found(path: &str) -> Self {
        Self::NotFound {
            entity: "track",
            key: path.to_string(),
        }
    }

    pub(crate) fn playlist_not_found(name: &str) -> Self {
        Self::NotFound {
            entity: "playlist",
            key: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T, E = LibraryError> = std::result::Result<T, E>;

/// Failures reported by an audio output capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutputError {
    #[error("Failed to load {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },
}

/// Failures raised by transport commands issued to the playback controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Invalid playback state: {0}")]
    InvalidState(&'static str),

    #[error("Unsupported playback rate: {0}")]
    UnsupportedRate(f32),

    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Failures while reading or writing the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
