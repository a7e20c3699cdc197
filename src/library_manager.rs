//! Catalog use cases built on the store and the tag reader.
//!
//! The manager keeps three presentation projections in step with the store:
//! the full track list, the "current" list (an open playlist or a search
//! result) and the playlist list. Operations that need a selected track or
//! playlist return `Ok(false)` without side effects when the selection is
//! missing.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use crate::error::{LibraryError, Result};
use crate::library_store::{LibraryStore, Playlist, SortColumn, Track};
use crate::metadata_tags::{TagReader, TrackTags};

/// The user's current track and playlist selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub current_track: Option<String>,
    pub current_playlist: Option<String>,
}

impl Selection {
    fn track(&self) -> Option<&str> {
        self.current_track.as_deref().filter(|path| !path.is_empty())
    }

    fn playlist(&self) -> Option<&str> {
        self.current_playlist.as_deref().filter(|name| !name.is_empty())
    }
}

/// One row of a track list as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRow {
    pub path: String,
    pub display_name: String,
}

impl TrackRow {
    pub fn from_path(path: &str) -> Self {
        Self {
            path: path.to_string(),
            display_name: display_name(path),
        }
    }
}

impl From<&Track> for TrackRow {
    fn from(track: &Track) -> Self {
        Self::from_path(&track.path)
    }
}

/// File name without directory or extension, falling back to the full path.
pub fn display_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| path.to_string())
}

fn rows(tracks: &[Track]) -> Vec<TrackRow> {
    tracks.iter().map(TrackRow::from).collect()
}

/// Result of asking the catalog to add a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(Track),
    AlreadyKnown,
}

/// What the current list is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CurrentView {
    Empty,
    Playlist(String),
    SearchResults,
}

pub struct LibraryManager {
    store: Arc<LibraryStore>,
    tag_reader: Box<dyn TagReader>,
    all_tracks: Vec<TrackRow>,
    current_tracks: Vec<TrackRow>,
    current_view: CurrentView,
    playlists: Vec<Playlist>,
}

impl LibraryManager {
    pub fn new(store: Arc<LibraryStore>, tag_reader: Box<dyn TagReader>) -> Self {
        Self {
            store,
            tag_reader,
            all_tracks: Vec::new(),
            current_tracks: Vec::new(),
            current_view: CurrentView::Empty,
            playlists: Vec::new(),
        }
    }

    pub fn all_tracks(&self) -> &[TrackRow] {
        &self.all_tracks
    }

    pub fn current_tracks(&self) -> &[TrackRow] {
        &self.current_tracks
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    /// Reloads the track and playlist projections from the store.
    pub fn refresh(&mut self) -> Result<()> {
        self.all_tracks = rows(&self.store.list_all_tracks()?);
        self.playlists = self.store.list_playlists()?;
        self.clear_current_view();
        info!(
            "LibraryManager: loaded {} tracks and {} playlists",
            self.all_tracks.len(),
            self.playlists.len()
        );
        Ok(())
    }

    /// Catalogs `path`, reading its tags only if the path is new.
    pub fn add_track(&mut self, path: &str) -> Result<AddOutcome> {
        if self.store.find_track_by_path(path)?.is_some() {
            debug!("LibraryManager: {} already in library", path);
            return Ok(AddOutcome::AlreadyKnown);
        }
        let tags = self.tag_reader.read_tags(Path::new(path));
        let id = self.store.add_track(path, &tags)?;
        let track = Track {
            id,
            path: path.to_string(),
            artist: tags.artist,
            album: tags.album,
            genre: tags.genre,
        };
        self.all_tracks.push(TrackRow::from(&track));
        debug!("LibraryManager: added track id={} path={}", id, path);
        Ok(AddOutcome::Added(track))
    }

    pub fn delete_current_track(&mut self, selection: &Selection) -> Result<bool> {
        let Some(path) = selection.track() else {
            return Ok(false);
        };
        self.store.delete_track(path)?;
        self.all_tracks.retain(|row| row.path != path);
        self.current_tracks.retain(|row| row.path != path);
        Ok(true)
    }

    pub fn create_playlist(&mut self) -> Result<Playlist> {
        let playlist = self.store.create_playlist()?;
        self.playlists.push(playlist.clone());
        Ok(playlist)
    }

    /// Deletes the selected playlist and clears the selection.
    pub fn delete_playlist(&mut self, selection: &mut Selection) -> Result<bool> {
        let Some(name) = selection.playlist().map(str::to_string) else {
            return Ok(false);
        };
        self.store.delete_playlist(&name)?;
        self.playlists.retain(|playlist| playlist.name != name);
        if self.is_showing_playlist(&name) {
            self.clear_current_view();
        }
        selection.current_playlist = None;
        Ok(true)
    }

    /// Renames the selected playlist. A blank or already-used name is ignored.
    pub fn rename_playlist(&mut self, selection: &mut Selection, new_name: &str) -> Result<bool> {
        let Some(old_name) = selection.playlist().map(str::to_string) else {
            return Ok(false);
        };
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Ok(false);
        }
        if !self.store.rename_playlist(&old_name, new_name)? {
            return Ok(false);
        }
        if let Some(playlist) = self
            .playlists
            .iter_mut()
            .find(|playlist| playlist.name == old_name)
        {
            playlist.name = new_name.to_string();
        }
        if self.is_showing_playlist(&old_name) {
            self.current_view = CurrentView::Playlist(new_name.to_string());
        }
        selection.current_playlist = Some(new_name.to_string());
        Ok(true)
    }

    /// Selects a playlist and shows its tracks in the current list.
    pub fn open_playlist(&mut self, selection: &mut Selection, name: &str) -> Result<&[TrackRow]> {
        let tracks = self.store.list_playlist_tracks(name)?;
        selection.current_playlist = Some(name.to_string());
        self.current_tracks = rows(&tracks);
        self.current_view = CurrentView::Playlist(name.to_string());
        Ok(self.current_tracks.as_slice())
    }

    /// Adds the selected track to the selected playlist. The current list
    /// only grows when it is showing that playlist.
    pub fn add_current_track_to_playlist(&mut self, selection: &Selection) -> Result<bool> {
        let (Some(path), Some(playlist)) = (selection.track(), selection.playlist()) else {
            return Ok(false);
        };
        if !self.store.add_to_playlist(playlist, path)? {
            return Ok(false);
        }
        if self.is_showing_playlist(playlist) {
            self.current_tracks.push(TrackRow::from_path(path));
        }
        Ok(true)
    }

    pub fn remove_current_track_from_playlist(&mut self, selection: &Selection) -> Result<bool> {
        let (Some(path), Some(playlist)) = (selection.track(), selection.playlist()) else {
            return Ok(false);
        };
        if !self.store.remove_from_playlist(playlist, path)? {
            return Ok(false);
        }
        if self.is_showing_playlist(playlist) {
            self.current_tracks.retain(|row| row.path != path);
        }
        Ok(true)
    }

    /// Reorders the full track list by `column`.
    pub fn sort_by(&mut self, column: SortColumn) -> Result<&[TrackRow]> {
        self.all_tracks = rows(&self.store.list_tracks_sorted_by(column)?);
        Ok(self.all_tracks.as_slice())
    }

    /// Replaces the current list with tracks matching `text`.
    pub fn search(&mut self, text: &str) -> Result<&[TrackRow]> {
        self.current_tracks = rows(&self.store.search_tracks(text)?);
        self.current_view = CurrentView::SearchResults;
        Ok(self.current_tracks.as_slice())
    }

    pub fn list_playlist_tracks(&self, name: &str) -> Result<Vec<Track>> {
        self.store.list_playlist_tracks(name)
    }

    pub fn list_all_tracks(&self) -> Result<Vec<Track>> {
        self.store.list_all_tracks()
    }

    /// Persisted row of the selected track.
    pub fn track_details(&self, selection: &Selection) -> Result<Option<Track>> {
        match selection.track() {
            Some(path) => self.store.find_track_by_path(path),
            None => Ok(None),
        }
    }

    /// Overwrites the track's tags and returns the row as stored.
    pub fn update_metadata(&mut self, path: &str, tags: &TrackTags) -> Result<Track> {
        self.store.update_track_metadata(path, tags)?;
        self.store
            .find_track_by_path(path)?
            .ok_or_else(|| LibraryError::track_not_found(path))
    }

    fn is_showing_playlist(&self, name: &str) -> bool {
        matches!(&self.current_view, CurrentView::Playlist(shown) if shown == name)
    }

    fn clear_current_view(&mut self) {
        self.current_tracks.clear();
        self.current_view = CurrentView::Empty;
    }
}
