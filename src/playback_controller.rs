//! Playback session state machine in front of an [`AudioOutput`].
//!
//! Commands are forwarded to the output; `state` and `position_ms` only
//! change when the output reports back through [`OutputEvent`]s.

use std::path::Path;

use log::{debug, trace};

use crate::audio_output::AudioOutput;
use crate::error::PlaybackError;
use crate::protocol::{OutputEvent, PlaybackRate, PlaybackSnapshot, PlayerState, TrackSource};

const NO_TRACK_LOADED: &str = "no track loaded";

fn round_volume(volume: f32) -> f32 {
    (volume * 1000.0).round() / 1000.0
}

/// Owns the single playback session and the output it drives.
pub struct PlaybackController {
    output: Box<dyn AudioOutput>,
    session: PlaybackSnapshot,
}

impl PlaybackController {
    pub fn new(output: Box<dyn AudioOutput>, initial_volume: f32, initial_rate: PlaybackRate) -> Self {
        Self {
            output,
            session: PlaybackSnapshot {
                current_track_path: None,
                state: PlayerState::Unknown,
                volume: round_volume(initial_volume.clamp(0.0, 1.0)),
                playback_rate: initial_rate,
                position_ms: 0,
                duration_ms: None,
                source: None,
            },
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.session.clone()
    }

    pub fn state(&self) -> PlayerState {
        self.session.state
    }

    fn require_loaded(&self) -> Result<(), PlaybackError> {
        match self.session.current_track_path {
            Some(_) => Ok(()),
            None => Err(PlaybackError::InvalidState(NO_TRACK_LOADED)),
        }
    }

    /// Hands `path` to the output. The session keeps its previous track if
    /// the output refuses the file.
    pub fn load(&mut self, path: &Path, source: Option<TrackSource>) -> Result<(), PlaybackError> {
        self.output.load(path)?;
        debug!("PlaybackController: loaded {}", path.display());
        self.session.current_track_path = Some(path.to_string_lossy().into_owned());
        self.session.position_ms = 0;
        self.session.duration_ms = None;
        if source.is_some() {
            self.session.source = source;
        }
        self.output.set_volume(self.session.volume);
        self.output
            .set_playback_rate(self.session.playback_rate.as_f32());
        Ok(())
    }

    /// Loads `path` launched from `source` and starts it.
    pub fn play_file(&mut self, path: &Path, source: TrackSource) -> Result<(), PlaybackError> {
        self.load(path, Some(source))?;
        self.play()
    }

    pub fn play(&mut self) -> Result<(), PlaybackError> {
        self.require_loaded()?;
        debug!("PlaybackController: play");
        self.output.play();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        self.require_loaded()?;
        debug!("PlaybackController: pause");
        self.output.pause();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), PlaybackError> {
        self.require_loaded()?;
        debug!("PlaybackController: resume");
        self.output.resume();
        Ok(())
    }

    /// Decides from the last state the output reported, not from the last
    /// command issued.
    pub fn toggle_play_pause(&mut self) -> Result<(), PlaybackError> {
        match self.session.state {
            PlayerState::Playing => self.pause(),
            PlayerState::Paused => self.resume(),
            PlayerState::Stopped | PlayerState::Unknown => self.play(),
        }
    }

    /// Stops the output. The track stays loaded so it can be played again.
    pub fn stop(&mut self) -> Result<(), PlaybackError> {
        self.require_loaded()?;
        debug!("PlaybackController: stop");
        self.output.stop();
        Ok(())
    }

    /// Seeks relative to the last reported position. Clamping is left to
    /// the output.
    pub fn seek_by(&mut self, delta_ms: i64) -> Result<(), PlaybackError> {
        self.require_loaded()?;
        let position = i64::try_from(self.session.position_ms).unwrap_or(i64::MAX);
        let target = position.saturating_add(delta_ms);
        debug!("PlaybackController: seek {:+}ms -> {}ms", delta_ms, target);
        self.output.seek(target);
        Ok(())
    }

    pub fn seek_to(&mut self, position_ms: i64) -> Result<(), PlaybackError> {
        self.require_loaded()?;
        debug!("PlaybackController: seek to {}ms", position_ms);
        self.output.seek(position_ms);
        Ok(())
    }

    /// Applies a volume step. The result is clamped to `[0.0, 1.0]`; returns
    /// `false` when already at the boundary in the requested direction.
    pub fn adjust_volume(&mut self, delta: f32) -> bool {
        if !delta.is_finite() {
            debug!("PlaybackController: ignoring volume step {}", delta);
            return false;
        }
        let current = self.session.volume;
        let next = round_volume(current + delta).clamp(0.0, 1.0);
        if next == current {
            trace!("PlaybackController: volume already at {}", current);
            return false;
        }
        debug!("PlaybackController: volume {} -> {}", current, next);
        self.session.volume = next;
        self.output.set_volume(next);
        true
    }

    pub fn set_playback_rate(&mut self, rate: PlaybackRate) -> Result<(), PlaybackError> {
        self.require_loaded()?;
        debug!("PlaybackController: playback rate {}", rate.as_f32());
        self.session.playback_rate = rate;
        self.output.set_playback_rate(rate.as_f32());
        Ok(())
    }

    /// Applies an inbound event from the output. Returns `true` when the
    /// session changed.
    pub fn handle_output_event(&mut self, event: &OutputEvent) -> bool {
        match *event {
            OutputEvent::StateChanged(state) => {
                if self.session.state == state {
                    return false;
                }
                debug!(
                    "PlaybackController: state {:?} -> {:?}",
                    self.session.state, state
                );
                self.session.state = state;
            }
            OutputEvent::PositionChanged(position_ms) => {
                if self.session.position_ms == position_ms {
                    return false;
                }
                trace!("PlaybackController: position {}ms", position_ms);
                self.session.position_ms = position_ms;
            }
            OutputEvent::DurationChanged(duration_ms) => {
                if self.session.duration_ms == Some(duration_ms) {
                    return false;
                }
                self.session.duration_ms = Some(duration_ms);
            }
        }
        true
    }

    /// Stops the output if a track is loaded.
    pub fn shutdown(&mut self) {
        if self.session.current_track_path.is_some() {
            self.output.stop();
        }
    }
}
