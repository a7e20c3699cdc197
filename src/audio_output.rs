//! Audio output seam and a timing-only implementation.
//!
//! Outputs never report state through return values: state and position
//! changes are published on the bus as [`OutputEvent`]s.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};
use tokio::sync::broadcast::Sender;

use crate::error::OutputError;
use crate::metadata_tags;
use crate::protocol::{Message, OutputEvent, PlayerState};

/// Transport capability driven by the playback controller.
pub trait AudioOutput: Send {
    fn load(&mut self, path: &Path) -> Result<(), OutputError>;
    fn play(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    /// Absolute position in milliseconds. Out-of-range values are clamped by
    /// the output.
    fn seek(&mut self, position_ms: i64);
    fn set_volume(&mut self, volume: f32);
    fn set_playback_rate(&mut self, rate: f32);
}

struct ClockState {
    path: Option<PathBuf>,
    duration_ms: Option<u64>,
    position_ms: f64,
    state: PlayerState,
    rate: f32,
    volume: f32,
    last_tick: Instant,
}

impl ClockState {
    /// Moves the playhead forward by the wall-clock time since the last tick.
    /// Returns `true` when the end of the track was reached.
    fn advance(&mut self, now: Instant) -> bool {
        let elapsed_ms = now.duration_since(self.last_tick).as_secs_f64() * 1000.0;
        self.last_tick = now;
        if self.state != PlayerState::Playing {
            return false;
        }
        self.position_ms += elapsed_ms * f64::from(self.rate);
        match self.duration_ms {
            Some(duration_ms) if self.position_ms >= duration_ms as f64 => {
                self.position_ms = duration_ms as f64;
                self.state = PlayerState::Stopped;
                true
            }
            _ => false,
        }
    }

    fn position(&self) -> u64 {
        self.position_ms.max(0.0) as u64
    }
}

/// Output that keeps a virtual playhead without opening a sound device.
///
/// A ticker thread advances the playhead by elapsed time multiplied by the
/// playback rate and reports the position every `tick_interval` while playing.
pub struct ClockOutput {
    state: Arc<Mutex<ClockState>>,
    bus_sender: Sender<Message>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    ticker: Option<JoinHandle<()>>,
}

fn lock_state(state: &Mutex<ClockState>) -> MutexGuard<'_, ClockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn publish(bus_sender: &Sender<Message>, events: Vec<OutputEvent>) {
    for event in events {
        trace!("ClockOutput: emitting {:?}", event);
        let _ = bus_sender.send(Message::Output(event));
    }
}

impl ClockOutput {
    pub fn new(bus_sender: Sender<Message>, tick_interval: Duration) -> Self {
        let state = Arc::new(Mutex::new(ClockState {
            path: None,
            duration_ms: None,
            position_ms: 0.0,
            state: PlayerState::Stopped,
            rate: 1.0,
            volume: 1.0,
            last_tick: Instant::now(),
        }));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let ticker_state = state.clone();
        let ticker_sender = bus_sender.clone();
        let ticker = thread::spawn(move || loop {
            match shutdown_rx.recv_timeout(tick_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
            let mut clock = lock_state(&ticker_state);
            if clock.state != PlayerState::Playing {
                continue;
            }
            let finished = clock.advance(Instant::now());
            let mut events = vec![OutputEvent::PositionChanged(clock.position())];
            if finished {
                debug!("ClockOutput: reached end of track");
                events.push(OutputEvent::StateChanged(PlayerState::Stopped));
            }
            // Published under the lock so a tick can never land after a
            // later command's events.
            publish(&ticker_sender, events);
        });

        Self {
            state,
            bus_sender,
            shutdown_tx: Some(shutdown_tx),
            ticker: Some(ticker),
        }
    }

    fn with_state<F>(&self, update: F)
    where
        F: FnOnce(&mut ClockState) -> Vec<OutputEvent>,
    {
        let mut clock = lock_state(&self.state);
        clock.advance(Instant::now());
        let events = update(&mut clock);
        publish(&self.bus_sender, events);
    }

    fn start(clock: &mut ClockState) -> Vec<OutputEvent> {
        if clock.path.is_none() {
            return Vec::new();
        }
        let mut events = Vec::new();
        if let Some(duration_ms) = clock.duration_ms {
            if clock.position_ms >= duration_ms as f64 {
                clock.position_ms = 0.0;
                events.push(OutputEvent::PositionChanged(0));
            }
        }
        clock.state = PlayerState::Playing;
        events.push(OutputEvent::StateChanged(PlayerState::Playing));
        events
    }
}

impl AudioOutput for ClockOutput {
    fn load(&mut self, path: &Path) -> Result<(), OutputError> {
        if !path.is_file() {
            return Err(OutputError::Load {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }
        let duration_ms = metadata_tags::probe_duration_ms(path);
        debug!(
            "ClockOutput: loaded {} duration_ms={:?}",
            path.display(),
            duration_ms
        );
        self.with_state(|clock| {
            let mut events = Vec::new();
            if matches!(clock.state, PlayerState::Playing | PlayerState::Paused) {
                events.push(OutputEvent::StateChanged(PlayerState::Stopped));
            }
            clock.path = Some(path.to_path_buf());
            clock.duration_ms = duration_ms;
            clock.position_ms = 0.0;
            clock.state = PlayerState::Stopped;
            events.push(OutputEvent::PositionChanged(0));
            if let Some(duration_ms) = duration_ms {
                events.push(OutputEvent::DurationChanged(duration_ms));
            }
            events
        });
        Ok(())
    }

    fn play(&mut self) {
        self.with_state(Self::start);
    }

    fn pause(&mut self) {
        self.with_state(|clock| {
            if clock.state != PlayerState::Playing {
                return Vec::new();
            }
            clock.state = PlayerState::Paused;
            vec![
                OutputEvent::PositionChanged(clock.position()),
                OutputEvent::StateChanged(PlayerState::Paused),
            ]
        });
    }

    fn resume(&mut self) {
        self.with_state(|clock| match clock.state {
            PlayerState::Playing => Vec::new(),
            _ => Self::start(clock),
        });
    }

    fn stop(&mut self) {
        self.with_state(|clock| {
            clock.state = PlayerState::Stopped;
            clock.position_ms = 0.0;
            vec![
                OutputEvent::StateChanged(PlayerState::Stopped),
                OutputEvent::PositionChanged(0),
            ]
        });
    }

    fn seek(&mut self, position_ms: i64) {
        self.with_state(|clock| {
            if clock.path.is_none() {
                return Vec::new();
            }
            let upper = clock.duration_ms.unwrap_or(u64::MAX);
            let target = position_ms.max(0) as u64;
            clock.position_ms = target.min(upper) as f64;
            vec![OutputEvent::PositionChanged(clock.position())]
        });
    }

    fn set_volume(&mut self, volume: f32) {
        self.with_state(|clock| {
            clock.volume = volume.clamp(0.0, 1.0);
            trace!("ClockOutput: volume {}", clock.volume);
            Vec::new()
        });
    }

    fn set_playback_rate(&mut self, rate: f32) {
        self.with_state(|clock| {
            clock.rate = rate;
            Vec::new()
        });
    }
}

impl Drop for ClockOutput {
    fn drop(&mut self) {
        drop(self.shutdown_tx.take());
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::broadcast::{self, error::TryRecvError, Receiver};

    fn drain_output_events(receiver: &mut Receiver<Message>) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(Message::Output(event)) => events.push(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::write(&path, b"not really audio").unwrap();
        (dir, path)
    }

    fn idle_output() -> (ClockOutput, Receiver<Message>) {
        let (bus_sender, receiver) = broadcast::channel(256);
        (ClockOutput::new(bus_sender, Duration::from_secs(3600)), receiver)
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let (mut output, _receiver) = idle_output();
        let err = output.load(Path::new("/definitely/missing.mp3")).unwrap_err();
        assert!(matches!(err, OutputError::Load { .. }));
    }

    #[test]
    fn test_transport_commands_emit_state_events() {
        let (_dir, path) = fixture();
        let (mut output, mut receiver) = idle_output();
        output.load(&path).unwrap();
        assert_eq!(
            drain_output_events(&mut receiver),
            vec![OutputEvent::PositionChanged(0)]
        );

        output.play();
        output.pause();
        output.resume();
        output.stop();

        let states: Vec<PlayerState> = drain_output_events(&mut receiver)
            .into_iter()
            .filter_map(|event| match event {
                OutputEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                PlayerState::Playing,
                PlayerState::Paused,
                PlayerState::Playing,
                PlayerState::Stopped
            ]
        );
    }

    #[test]
    fn test_play_without_track_is_ignored() {
        let (mut output, mut receiver) = idle_output();
        output.play();
        output.seek(5_000);
        assert!(drain_output_events(&mut receiver).is_empty());
    }

    #[test]
    fn test_seek_clamps_below_zero() {
        let (_dir, path) = fixture();
        let (mut output, mut receiver) = idle_output();
        output.load(&path).unwrap();
        drain_output_events(&mut receiver);

        output.seek(-10_000);
        output.seek(42_000);

        assert_eq!(
            drain_output_events(&mut receiver),
            vec![
                OutputEvent::PositionChanged(0),
                OutputEvent::PositionChanged(42_000)
            ]
        );
    }

    #[test]
    fn test_reload_while_playing_ends_at_position_zero() {
        let (_dir, path) = fixture();
        let (bus_sender, mut receiver) = broadcast::channel(4096);
        let mut output = ClockOutput::new(bus_sender, Duration::from_millis(1));

        for _ in 0..20 {
            output.load(&path).unwrap();
            output.play();
            thread::sleep(Duration::from_millis(5));
            output.load(&path).unwrap();

            let last_position = drain_output_events(&mut receiver)
                .into_iter()
                .filter_map(|event| match event {
                    OutputEvent::PositionChanged(ms) => Some(ms),
                    _ => None,
                })
                .last();
            assert_eq!(last_position, Some(0));
        }
    }

    #[test]
    fn test_ticker_reports_position_while_playing() {
        let (_dir, path) = fixture();
        let (bus_sender, mut receiver) = broadcast::channel(1024);
        let mut output = ClockOutput::new(bus_sender, Duration::from_millis(10));
        output.load(&path).unwrap();
        output.play();

        thread::sleep(Duration::from_millis(100));
        output.pause();

        let positions: Vec<u64> = drain_output_events(&mut receiver)
            .into_iter()
            .filter_map(|event| match event {
                OutputEvent::PositionChanged(ms) => Some(ms),
                _ => None,
            })
            .collect();
        assert!(positions.len() > 2, "positions: {:?}", positions);
        assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(*positions.last().unwrap() > 0);
    }
}
