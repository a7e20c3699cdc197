//! Actor thread that owns the playback controller.
//!
//! Transport commands and output callbacks arrive through one bus receiver,
//! so every mutation of the session happens on this thread in arrival order.

use std::io;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::error::PlaybackError;
use crate::playback_controller::PlaybackController;
use crate::protocol::{Message, PlaybackMessage};

enum Flow {
    Continue,
    Exit,
}

pub struct PlaybackRuntime {
    controller: PlaybackController,
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
}

impl PlaybackRuntime {
    pub fn new(controller: PlaybackController, bus_producer: Sender<Message>) -> Self {
        let bus_consumer = bus_producer.subscribe();
        Self {
            controller,
            bus_consumer,
            bus_producer,
        }
    }

    fn publish_session(&self) {
        let _ = self.bus_producer.send(Message::Playback(
            PlaybackMessage::SessionChanged(self.controller.snapshot()),
        ));
    }

    fn apply_command(&mut self, command: PlaybackMessage) -> Result<Flow, PlaybackError> {
        match command {
            PlaybackMessage::Load { path, source } => self.controller.load(&path, source)?,
            PlaybackMessage::PlayFile { path, source } => {
                self.controller.play_file(&path, source)?
            }
            PlaybackMessage::Play => self.controller.play()?,
            PlaybackMessage::Pause => self.controller.pause()?,
            PlaybackMessage::Resume => self.controller.resume()?,
            PlaybackMessage::TogglePlayPause => self.controller.toggle_play_pause()?,
            PlaybackMessage::Stop => self.controller.stop()?,
            PlaybackMessage::SeekBy(delta_ms) => self.controller.seek_by(delta_ms)?,
            PlaybackMessage::SeekTo(position_ms) => self.controller.seek_to(position_ms)?,
            PlaybackMessage::AdjustVolume(delta) => {
                if !self.controller.adjust_volume(delta) {
                    return Ok(Flow::Continue);
                }
            }
            PlaybackMessage::SetPlaybackRate(rate) => self.controller.set_playback_rate(rate)?,
            PlaybackMessage::Shutdown => {
                self.controller.shutdown();
                return Ok(Flow::Exit);
            }
            // Our own notifications echo back through the bus.
            PlaybackMessage::SessionChanged(_) | PlaybackMessage::CommandRejected(_) => {
                return Ok(Flow::Continue);
            }
        }
        self.publish_session();
        Ok(Flow::Continue)
    }

    fn handle_message(&mut self, message: Message) -> Flow {
        match message {
            Message::Playback(command) => {
                let description = format!("{:?}", command);
                match self.apply_command(command) {
                    Ok(flow) => flow,
                    Err(err) => {
                        warn!("PlaybackRuntime: rejected {}: {}", description, err);
                        let _ = self.bus_producer.send(Message::Playback(
                            PlaybackMessage::CommandRejected(err.to_string()),
                        ));
                        Flow::Continue
                    }
                }
            }
            Message::Output(event) => {
                if self.controller.handle_output_event(&event) {
                    self.publish_session();
                }
                Flow::Continue
            }
        }
    }

    /// Processes bus traffic until `Shutdown` arrives or the bus closes.
    pub fn run(&mut self) {
        info!("PlaybackRuntime: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => {
                    if let Flow::Exit = self.handle_message(message) {
                        info!("PlaybackRuntime: shutting down");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "PlaybackRuntime: bus receiver lagged, skipped {} messages",
                        skipped
                    );
                }
                Err(RecvError::Closed) => {
                    debug!("PlaybackRuntime: bus closed");
                    break;
                }
            }
        }
    }
}

/// Subscribes to the bus and moves `controller` onto a dedicated thread.
///
/// The subscription happens before the thread starts, so commands sent right
/// after this returns are not missed.
pub fn spawn_playback_runtime(
    controller: PlaybackController,
    bus_producer: Sender<Message>,
) -> io::Result<JoinHandle<()>> {
    let mut runtime = PlaybackRuntime::new(controller, bus_producer);
    thread::Builder::new()
        .name("playback-runtime".to_string())
        .spawn(move || runtime.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_output::AudioOutput;
    use crate::error::OutputError;
    use crate::protocol::{OutputEvent, PlaybackRate, PlaybackSnapshot, PlayerState, TrackSource};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError};

    /// Output that answers every transport command with the event a real
    /// device would publish.
    struct EchoOutput {
        bus_sender: Sender<Message>,
        stops: Arc<AtomicUsize>,
    }

    impl EchoOutput {
        fn emit(&self, event: OutputEvent) {
            let _ = self.bus_sender.send(Message::Output(event));
        }
    }

    impl AudioOutput for EchoOutput {
        fn load(&mut self, path: &Path) -> Result<(), OutputError> {
            if path.starts_with("/missing") {
                return Err(OutputError::Load {
                    path: path.to_path_buf(),
                    reason: "file does not exist".to_string(),
                });
            }
            self.emit(OutputEvent::PositionChanged(0));
            Ok(())
        }
        fn play(&mut self) {
            self.emit(OutputEvent::StateChanged(PlayerState::Playing));
        }
        fn pause(&mut self) {
            self.emit(OutputEvent::StateChanged(PlayerState::Paused));
        }
        fn resume(&mut self) {
            self.emit(OutputEvent::StateChanged(PlayerState::Playing));
        }
        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.emit(OutputEvent::StateChanged(PlayerState::Stopped));
        }
        fn seek(&mut self, position_ms: i64) {
            self.emit(OutputEvent::PositionChanged(position_ms.max(0) as u64));
        }
        fn set_volume(&mut self, _volume: f32) {}
        fn set_playback_rate(&mut self, _rate: f32) {}
    }

    struct Harness {
        bus_sender: Sender<Message>,
        receiver: Receiver<Message>,
        stops: Arc<AtomicUsize>,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn start(initial_volume: f32) -> Self {
            let (bus_sender, receiver) = broadcast::channel(256);
            let stops = Arc::new(AtomicUsize::new(0));
            let output = EchoOutput {
                bus_sender: bus_sender.clone(),
                stops: stops.clone(),
            };
            let controller =
                PlaybackController::new(Box::new(output), initial_volume, PlaybackRate::Normal);
            let handle = spawn_playback_runtime(controller, bus_sender.clone()).unwrap();
            Self {
                bus_sender,
                receiver,
                stops,
                handle,
            }
        }

        fn send(&self, command: PlaybackMessage) {
            self.bus_sender.send(Message::Playback(command)).unwrap();
        }

        fn load(&self, path: &str) {
            self.send(PlaybackMessage::Load {
                path: PathBuf::from(path),
                source: Some(TrackSource::AllTracks),
            });
        }

        fn wait_for_session<F>(&mut self, mut predicate: F) -> PlaybackSnapshot
        where
            F: FnMut(&PlaybackSnapshot) -> bool,
        {
            match wait_for_message(&mut self.receiver, Duration::from_secs(2), |message| {
                matches!(
                    message,
                    Message::Playback(PlaybackMessage::SessionChanged(snapshot)) if predicate(snapshot)
                )
            }) {
                Message::Playback(PlaybackMessage::SessionChanged(snapshot)) => snapshot,
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    fn wait_for_message<F>(receiver: &mut Receiver<Message>, timeout: Duration, mut predicate: F) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected message");
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return message;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("bus closed while waiting for message"),
            }
        }
    }

    fn assert_no_message<F>(receiver: &mut Receiver<Message>, timeout: Duration, mut predicate: F)
    where
        F: FnMut(&Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                return;
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        panic!("received unexpected message: {:?}", message);
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => return,
            }
        }
    }

    #[test]
    fn test_command_without_track_is_rejected() {
        let mut harness = Harness::start(0.5);

        harness.send(PlaybackMessage::Play);

        let message = wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(message, Message::Playback(PlaybackMessage::CommandRejected(_)))
        });
        match message {
            Message::Playback(PlaybackMessage::CommandRejected(reason)) => {
                assert!(reason.contains("no track loaded"), "reason: {}", reason);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_state_follows_output_events() {
        let mut harness = Harness::start(0.5);
        harness.load("/music/a.mp3");
        harness.send(PlaybackMessage::Play);

        let snapshot = harness.wait_for_session(|snapshot| snapshot.state == PlayerState::Playing);
        assert_eq!(snapshot.current_track_path.as_deref(), Some("/music/a.mp3"));

        harness.send(PlaybackMessage::TogglePlayPause);
        harness.wait_for_session(|snapshot| snapshot.state == PlayerState::Paused);

        harness.send(PlaybackMessage::TogglePlayPause);
        harness.wait_for_session(|snapshot| snapshot.state == PlayerState::Playing);
    }

    #[test]
    fn test_seek_uses_last_reported_position() {
        let mut harness = Harness::start(0.5);
        harness.load("/music/a.mp3");
        harness.wait_for_session(|snapshot| snapshot.current_track_path.is_some());
        harness
            .bus_sender
            .send(Message::Output(OutputEvent::PositionChanged(3_000)))
            .unwrap();
        harness.wait_for_session(|snapshot| snapshot.position_ms == 3_000);

        harness.send(PlaybackMessage::SeekBy(10_000));

        let snapshot = harness.wait_for_session(|snapshot| snapshot.position_ms != 3_000);
        assert_eq!(snapshot.position_ms, 13_000);
        assert_eq!(snapshot.position_secs(), 13);
    }

    #[test]
    fn test_extreme_seek_does_not_stop_runtime() {
        let mut harness = Harness::start(0.5);
        harness.load("/music/a.mp3");
        harness.wait_for_session(|snapshot| snapshot.current_track_path.is_some());
        harness
            .bus_sender
            .send(Message::Output(OutputEvent::PositionChanged(1)))
            .unwrap();
        harness.wait_for_session(|snapshot| snapshot.position_ms == 1);

        harness.send(PlaybackMessage::SeekBy(i64::MAX));
        let snapshot = harness.wait_for_session(|snapshot| snapshot.position_ms != 1);
        assert_eq!(snapshot.position_ms, i64::MAX as u64);

        harness.send(PlaybackMessage::Play);
        harness.wait_for_session(|snapshot| snapshot.state == PlayerState::Playing);
    }

    #[test]
    fn test_failed_load_keeps_session_running() {
        let mut harness = Harness::start(0.5);
        harness.load("/music/a.mp3");
        harness.wait_for_session(|snapshot| snapshot.current_track_path.is_some());

        harness.load("/missing/b.mp3");
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(message, Message::Playback(PlaybackMessage::CommandRejected(_)))
        });

        harness.send(PlaybackMessage::Play);
        let snapshot = harness.wait_for_session(|snapshot| snapshot.state == PlayerState::Playing);
        assert_eq!(snapshot.current_track_path.as_deref(), Some("/music/a.mp3"));
    }

    #[test]
    fn test_volume_at_bound_publishes_nothing() {
        let mut harness = Harness::start(1.0);

        harness.send(PlaybackMessage::AdjustVolume(0.1));
        assert_no_message(&mut harness.receiver, Duration::from_millis(100), |message| {
            matches!(message, Message::Playback(PlaybackMessage::SessionChanged(_)))
        });

        harness.send(PlaybackMessage::AdjustVolume(-0.1));
        let snapshot = harness.wait_for_session(|_| true);
        assert!((snapshot.volume - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_shutdown_stops_output_and_exits() {
        let mut harness = Harness::start(0.5);
        harness.load("/music/a.mp3");
        harness.wait_for_session(|snapshot| snapshot.current_track_path.is_some());

        harness.send(PlaybackMessage::Shutdown);
        let Harness { stops, handle, .. } = harness;
        handle.join().unwrap();

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
