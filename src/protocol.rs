//! Event-bus protocol shared by the playback runtime, the audio output and
//! the front end.

use std::path::PathBuf;

use crate::error::PlaybackError;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Playback(PlaybackMessage),
    Output(OutputEvent),
}

/// Transport state as last reported by the audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// No state event has arrived yet.
    #[default]
    Unknown,
    Stopped,
    Playing,
    Paused,
}

/// The playback speeds the transport accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackRate {
    Quarter,
    Half,
    ThreeQuarters,
    #[default]
    Normal,
    OneAndQuarter,
    OneAndHalf,
    OneAndThreeQuarters,
    Double,
}

impl PlaybackRate {
    pub const ALL: [PlaybackRate; 8] = [
        PlaybackRate::Quarter,
        PlaybackRate::Half,
        PlaybackRate::ThreeQuarters,
        PlaybackRate::Normal,
        PlaybackRate::OneAndQuarter,
        PlaybackRate::OneAndHalf,
        PlaybackRate::OneAndThreeQuarters,
        PlaybackRate::Double,
    ];

    pub fn as_f32(self) -> f32 {
        match self {
            PlaybackRate::Quarter => 0.25,
            PlaybackRate::Half => 0.5,
            PlaybackRate::ThreeQuarters => 0.75,
            PlaybackRate::Normal => 1.0,
            PlaybackRate::OneAndQuarter => 1.25,
            PlaybackRate::OneAndHalf => 1.5,
            PlaybackRate::OneAndThreeQuarters => 1.75,
            PlaybackRate::Double => 2.0,
        }
    }

    /// Exact match against the enumerated speeds.
    pub fn from_f32(value: f32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|rate| (rate.as_f32() - value).abs() < 1e-6)
    }

    /// Closest enumerated speed, used when sanitizing configuration.
    pub fn nearest(value: f32) -> Self {
        Self::ALL
            .into_iter()
            .min_by(|left, right| {
                let left_distance = (left.as_f32() - value).abs();
                let right_distance = (right.as_f32() - value).abs();
                left_distance.total_cmp(&right_distance)
            })
            .unwrap_or_default()
    }
}

impl TryFrom<f32> for PlaybackRate {
    type Error = PlaybackError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::from_f32(value).ok_or(PlaybackError::UnsupportedRate(value))
    }
}

/// Which presentation list the active track was launched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    AllTracks,
    CurrentList,
}

/// Read-only copy of the playback session published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub current_track_path: Option<String>,
    pub state: PlayerState,
    pub volume: f32,
    pub playback_rate: PlaybackRate,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub source: Option<TrackSource>,
}

impl PlaybackSnapshot {
    /// Whole seconds elapsed, as shown next to the transport controls.
    pub fn position_secs(&self) -> u64 {
        self.position_ms / 1000
    }
}

/// Playback-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    Load {
        path: PathBuf,
        source: Option<TrackSource>,
    },
    PlayFile {
        path: PathBuf,
        source: TrackSource,
    },
    Play,
    Pause,
    Resume,
    TogglePlayPause,
    Stop,
    /// Relative seek from the last reported position, in milliseconds.
    SeekBy(i64),
    SeekTo(i64),
    AdjustVolume(f32),
    SetPlaybackRate(PlaybackRate),
    Shutdown,
    SessionChanged(PlaybackSnapshot),
    CommandRejected(String),
}

/// Callbacks delivered by the audio output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    StateChanged(PlayerState),
    PositionChanged(u64),
    DurationChanged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_lookup_accepts_only_enumerated_values() {
        assert_eq!(PlaybackRate::from_f32(0.25), Some(PlaybackRate::Quarter));
        assert_eq!(PlaybackRate::from_f32(2.0), Some(PlaybackRate::Double));
        assert_eq!(PlaybackRate::from_f32(1.1), None);
        assert_eq!(PlaybackRate::nearest(1.1), PlaybackRate::Normal);
        assert_eq!(PlaybackRate::nearest(9.0), PlaybackRate::Double);
        assert_eq!(
            PlaybackRate::try_from(3.0),
            Err(PlaybackError::UnsupportedRate(3.0))
        );
    }

    #[test]
    fn test_position_secs_truncates() {
        let snapshot = PlaybackSnapshot {
            current_track_path: None,
            state: PlayerState::Unknown,
            volume: 0.5,
            playback_rate: PlaybackRate::Normal,
            position_ms: 61_999,
            duration_ms: None,
            source: None,
        };
        assert_eq!(snapshot.position_secs(), 61);
    }
}
