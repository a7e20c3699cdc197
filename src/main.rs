use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use audioshelf::audio_output::ClockOutput;
use audioshelf::config::default_config_path;
use audioshelf::config_persistence::load_or_create_config;
use audioshelf::console::Console;
use audioshelf::library_manager::LibraryManager;
use audioshelf::library_store::LibraryStore;
use audioshelf::metadata_tags::LoftyTagReader;
use audioshelf::playback_controller::PlaybackController;
use audioshelf::playback_runtime::spawn_playback_runtime;
use audioshelf::protocol::{Message, PlaybackMessage, PlayerState};
use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

const LOG_ENV_VAR: &str = "AUDIOSHELF_LOG";

fn init_logging(configured: log::LevelFilter) {
    let level = std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|value| value.parse::<log::LevelFilter>().ok())
        .unwrap_or(configured);

    let mut clog = colog::default_builder();
    clog.filter(None, level);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

/// Logs session transitions and rejected commands published by the runtime.
fn spawn_notification_logger(bus_sender: &broadcast::Sender<Message>) -> io::Result<()> {
    let mut receiver = bus_sender.subscribe();
    thread::Builder::new()
        .name("notification-logger".to_string())
        .spawn(move || {
            let mut last_state = PlayerState::Unknown;
            let mut last_track: Option<String> = None;
            loop {
                match receiver.blocking_recv() {
                    Ok(Message::Playback(PlaybackMessage::SessionChanged(snapshot))) => {
                        if snapshot.state != last_state || snapshot.current_track_path != last_track {
                            info!(
                                "Playback: {:?} {}",
                                snapshot.state,
                                snapshot.current_track_path.as_deref().unwrap_or("-")
                            );
                            last_state = snapshot.state;
                            last_track = snapshot.current_track_path;
                        }
                    }
                    Ok(Message::Playback(PlaybackMessage::CommandRejected(reason))) => {
                        warn!("Playback: command rejected: {}", reason);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_file = default_config_path();
    let config = load_or_create_config(&config_file);
    init_logging(config.logging.level_filter());
    debug!("Loaded config from {}", config_file.display());

    let store = Arc::new(LibraryStore::new(
        &config.library.resolved_database_path(),
    )?);
    let mut manager = LibraryManager::new(store, Box::new(LoftyTagReader));
    manager.refresh()?;

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);

    let output = ClockOutput::new(
        bus_sender.clone(),
        Duration::from_millis(config.playback.position_interval_ms),
    );
    let controller = PlaybackController::new(
        Box::new(output),
        config.playback.initial_volume,
        config.playback.initial_playback_rate(),
    );
    let runtime_handle = spawn_playback_runtime(controller, bus_sender.clone())?;
    spawn_notification_logger(&bus_sender)?;
    info!("Playback runtime started");

    let mut console = Console::new(manager, config.playback.clone(), bus_sender.clone());
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let console_result = console.run(stdin.lock(), &mut stdout);

    let _ = bus_sender.send(Message::Playback(PlaybackMessage::Shutdown));
    if runtime_handle.join().is_err() {
        warn!("Playback runtime panicked during shutdown");
    }
    info!("Shut down");
    console_result?;
    Ok(())
}
