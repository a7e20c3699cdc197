//! Line-oriented front end used by the binary.
//!
//! Catalog commands run synchronously against the [`LibraryManager`];
//! transport commands are published on the bus for the playback runtime.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use log::{debug, warn};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::config::PlaybackConfig;
use crate::error::LibraryError;
use crate::library_manager::{AddOutcome, LibraryManager, Selection, TrackRow};
use crate::library_store::SortColumn;
use crate::metadata_tags::TrackTags;
use crate::protocol::{Message, PlaybackMessage, PlaybackRate, PlaybackSnapshot, TrackSource};

const HELP: &str = "\
commands:
  add <path>              add a file to the library
  tracks                  list all tracks
  sort <artist|album|genre>
  search <text>           search artist, album and genre
  select <path>           select a track
  details                 show tags of the selected track
  edit <artist>|<album>|<genre>
  delete                  remove the selected track from the library
  playlists               list playlists
  new-playlist            create a playlist
  open <name>             select a playlist and list its tracks
  rename <new name>       rename the selected playlist
  drop-playlist           delete the selected playlist
  add-to-playlist         add the selected track to the selected playlist
  remove-from-playlist    remove the selected track from the selected playlist
  play [path]             play a file, the selected track, or resume
  toggle | pause | stop
  ff | rew                seek forward or back
  vol+ | vol-
  rate <0.25..2>
  status
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(String),
    Tracks,
    Sort(SortColumn),
    Search(String),
    Select(String),
    Details,
    Edit(TrackTags),
    Delete,
    Playlists,
    NewPlaylist,
    Open(String),
    Rename(String),
    DropPlaylist,
    AddToPlaylist,
    RemoveFromPlaylist,
    Play(Option<String>),
    Toggle,
    Pause,
    Stop,
    FastForward,
    Rewind,
    VolumeUp,
    VolumeDown,
    Rate(PlaybackRate),
    Status,
    Help,
    Quit,
}

fn required(argument: &str, usage: &str) -> Result<String, String> {
    if argument.is_empty() {
        Err(format!("usage: {}", usage))
    } else {
        Ok(argument.to_string())
    }
}

fn parse_tags(argument: &str) -> Result<TrackTags, String> {
    let fields: Vec<&str> = argument.split('|').map(str::trim).collect();
    match fields.as_slice() {
        [artist, album, genre] => Ok(TrackTags::new(*artist, *album, *genre)),
        _ => Err("usage: edit <artist>|<album>|<genre>".to_string()),
    }
}

/// Parses one input line. The verb is case-insensitive; the argument is
/// taken verbatim after trimming.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, argument) = match line.split_once(char::is_whitespace) {
        Some((verb, argument)) => (verb, argument.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "add" => Command::Add(required(argument, "add <path>")?),
        "tracks" => Command::Tracks,
        "sort" => Command::Sort(argument.parse()?),
        "search" => Command::Search(argument.to_string()),
        "select" => Command::Select(required(argument, "select <path>")?),
        "details" => Command::Details,
        "edit" => Command::Edit(parse_tags(argument)?),
        "delete" => Command::Delete,
        "playlists" => Command::Playlists,
        "new-playlist" => Command::NewPlaylist,
        "open" => Command::Open(required(argument, "open <name>")?),
        "rename" => Command::Rename(required(argument, "rename <new name>")?),
        "drop-playlist" => Command::DropPlaylist,
        "add-to-playlist" => Command::AddToPlaylist,
        "remove-from-playlist" => Command::RemoveFromPlaylist,
        "play" => Command::Play((!argument.is_empty()).then(|| argument.to_string())),
        "toggle" => Command::Toggle,
        "pause" => Command::Pause,
        "stop" => Command::Stop,
        "ff" => Command::FastForward,
        "rew" => Command::Rewind,
        "vol+" => Command::VolumeUp,
        "vol-" => Command::VolumeDown,
        "rate" => {
            let value: f32 = argument
                .parse()
                .map_err(|_| "usage: rate <0.25|0.5|0.75|1|1.25|1.5|1.75|2>".to_string())?;
            Command::Rate(PlaybackRate::try_from(value).map_err(|err| err.to_string())?)
        }
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(command)
}

fn format_snapshot(snapshot: &PlaybackSnapshot) -> String {
    let track = snapshot
        .current_track_path
        .as_deref()
        .unwrap_or("(no track)");
    let duration = snapshot
        .duration_ms
        .map(|duration_ms| format!("/{}s", duration_ms / 1000))
        .unwrap_or_default();
    format!(
        "{:?} {} {}s{} volume={:.2} rate={}",
        snapshot.state,
        track,
        snapshot.position_secs(),
        duration,
        snapshot.volume,
        snapshot.playback_rate.as_f32()
    )
}

pub struct Console {
    manager: LibraryManager,
    selection: Selection,
    playback: PlaybackConfig,
    bus_producer: Sender<Message>,
    bus_consumer: Receiver<Message>,
    last_snapshot: Option<PlaybackSnapshot>,
}

impl Console {
    pub fn new(manager: LibraryManager, playback: PlaybackConfig, bus_producer: Sender<Message>) -> Self {
        let bus_consumer = bus_producer.subscribe();
        Self {
            manager,
            selection: Selection::default(),
            playback,
            bus_producer,
            bus_consumer,
            last_snapshot: None,
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    fn send(&self, command: PlaybackMessage) {
        debug!("Console: sending {:?}", command);
        let _ = self.bus_producer.send(Message::Playback(command));
    }

    /// Drains pending bus traffic and returns the newest session snapshot.
    fn latest_snapshot(&mut self) -> Option<&PlaybackSnapshot> {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(Message::Playback(PlaybackMessage::SessionChanged(snapshot))) => {
                    self.last_snapshot = Some(snapshot);
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        self.last_snapshot.as_ref()
    }

    fn source_of(&self, path: &str) -> TrackSource {
        if self.manager.current_tracks().iter().any(|row| row.path == path) {
            TrackSource::CurrentList
        } else {
            TrackSource::AllTracks
        }
    }

    fn write_rows<W: Write>(output: &mut W, rows: &[TrackRow]) -> io::Result<()> {
        if rows.is_empty() {
            return writeln!(output, "(no tracks)");
        }
        for row in rows {
            writeln!(output, "{}\t{}", row.display_name, row.path)?;
        }
        Ok(())
    }

    fn report_guard<W: Write>(output: &mut W, applied: bool, done: &str) -> io::Result<()> {
        if applied {
            writeln!(output, "{}", done)
        } else {
            writeln!(output, "nothing to do")
        }
    }

    fn run_catalog_command<W: Write>(
        &mut self,
        command: Command,
        output: &mut W,
    ) -> Result<io::Result<()>, LibraryError> {
        let written = match command {
            Command::Add(path) => match self.manager.add_track(&path)? {
                AddOutcome::Added(track) => {
                    self.selection.current_track = Some(track.path.clone());
                    self.send(PlaybackMessage::Load {
                        path: PathBuf::from(&track.path),
                        source: Some(TrackSource::AllTracks),
                    });
                    writeln!(
                        output,
                        "added {} ({} / {} / {})",
                        track.path, track.artist, track.album, track.genre
                    )
                }
                AddOutcome::AlreadyKnown => writeln!(output, "already in library: {}", path),
            },
            Command::Tracks => Self::write_rows(output, self.manager.all_tracks()),
            Command::Sort(column) => {
                let rows = self.manager.sort_by(column)?;
                Self::write_rows(output, rows)
            }
            Command::Search(text) => {
                let rows = self.manager.search(&text)?;
                Self::write_rows(output, rows)
            }
            Command::Select(path) => {
                self.selection.current_track = Some(path.clone());
                writeln!(output, "selected {}", path)
            }
            Command::Details => match self.manager.track_details(&self.selection)? {
                Some(track) => writeln!(
                    output,
                    "path: {}\nartist: {}\nalbum: {}\ngenre: {}",
                    track.path, track.artist, track.album, track.genre
                ),
                None => writeln!(output, "no track selected"),
            },
            Command::Edit(tags) => match self.selection.current_track.clone() {
                Some(path) => {
                    let track = self.manager.update_metadata(&path, &tags)?;
                    writeln!(
                        output,
                        "saved {} ({} / {} / {})",
                        track.path, track.artist, track.album, track.genre
                    )
                }
                None => writeln!(output, "no track selected"),
            },
            Command::Delete => {
                let deleted = self.manager.delete_current_track(&self.selection)?;
                if deleted {
                    self.selection.current_track = None;
                }
                Self::report_guard(output, deleted, "deleted")
            }
            Command::Playlists => {
                let mut result = Ok(());
                for playlist in self.manager.playlists() {
                    let marker = if self.selection.current_playlist.as_deref()
                        == Some(playlist.name.as_str())
                    {
                        "*"
                    } else {
                        " "
                    };
                    result = writeln!(output, "{} {}", marker, playlist.name);
                    if result.is_err() {
                        break;
                    }
                }
                result
            }
            Command::NewPlaylist => {
                let playlist = self.manager.create_playlist()?;
                writeln!(output, "created {}", playlist.name)
            }
            Command::Open(name) => {
                let rows = self.manager.open_playlist(&mut self.selection, &name)?;
                Self::write_rows(output, rows)
            }
            Command::Rename(new_name) => {
                let renamed = self.manager.rename_playlist(&mut self.selection, &new_name)?;
                Self::report_guard(output, renamed, "renamed")
            }
            Command::DropPlaylist => {
                let dropped = self.manager.delete_playlist(&mut self.selection)?;
                Self::report_guard(output, dropped, "deleted playlist")
            }
            Command::AddToPlaylist => {
                let added = self.manager.add_current_track_to_playlist(&self.selection)?;
                Self::report_guard(output, added, "added to playlist")
            }
            Command::RemoveFromPlaylist => {
                let removed = self
                    .manager
                    .remove_current_track_from_playlist(&self.selection)?;
                Self::report_guard(output, removed, "removed from playlist")
            }
            _ => Ok(()),
        };
        Ok(written)
    }

    fn run_transport_command<W: Write>(&mut self, command: Command, output: &mut W) -> io::Result<()> {
        let seek_step_ms = self.playback.seek_step_ms as i64;
        match command {
            Command::Play(Some(path)) => {
                let source = self.source_of(&path);
                self.selection.current_track = Some(path.clone());
                self.send(PlaybackMessage::PlayFile {
                    path: PathBuf::from(path),
                    source,
                });
            }
            Command::Play(None) => match self.selection.current_track.clone() {
                Some(path) => {
                    let source = self.source_of(&path);
                    let already_loaded = self
                        .latest_snapshot()
                        .and_then(|snapshot| snapshot.current_track_path.as_deref())
                        == Some(path.as_str());
                    if already_loaded {
                        self.send(PlaybackMessage::Resume);
                    } else {
                        self.send(PlaybackMessage::PlayFile {
                            path: PathBuf::from(path),
                            source,
                        });
                    }
                }
                None => self.send(PlaybackMessage::Play),
            },
            Command::Toggle => self.send(PlaybackMessage::TogglePlayPause),
            Command::Pause => self.send(PlaybackMessage::Pause),
            Command::Stop => self.send(PlaybackMessage::Stop),
            Command::FastForward => self.send(PlaybackMessage::SeekBy(seek_step_ms)),
            Command::Rewind => self.send(PlaybackMessage::SeekBy(-seek_step_ms)),
            Command::VolumeUp => self.send(PlaybackMessage::AdjustVolume(self.playback.volume_step)),
            Command::VolumeDown => {
                self.send(PlaybackMessage::AdjustVolume(-self.playback.volume_step))
            }
            Command::Rate(rate) => self.send(PlaybackMessage::SetPlaybackRate(rate)),
            Command::Status => {
                let line = match self.latest_snapshot() {
                    Some(snapshot) => format_snapshot(snapshot),
                    None => "no playback yet".to_string(),
                };
                return writeln!(output, "{}", line);
            }
            _ => {}
        }
        Ok(())
    }

    /// Executes one command. Returns `false` when the console should exit.
    pub fn execute<W: Write>(&mut self, command: Command, output: &mut W) -> io::Result<bool> {
        match command {
            Command::Quit => return Ok(false),
            Command::Help => writeln!(output, "{}", HELP)?,
            Command::Play(_)
            | Command::Toggle
            | Command::Pause
            | Command::Stop
            | Command::FastForward
            | Command::Rewind
            | Command::VolumeUp
            | Command::VolumeDown
            | Command::Rate(_)
            | Command::Status => self.run_transport_command(command, output)?,
            catalog_command => match self.run_catalog_command(catalog_command, output) {
                Ok(written) => written?,
                Err(err) => {
                    warn!("Console: command failed: {}", err);
                    writeln!(output, "error: {}", err)?;
                }
            },
        }
        Ok(true)
    }

    /// Reads commands until `quit` or end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, output: &mut W) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(command) => {
                    if !self.execute(command, output)? {
                        break;
                    }
                }
                Err(message) => writeln!(output, "{}", message)?,
            }
            output.flush()?;
        }
        Ok(())
    }
}
