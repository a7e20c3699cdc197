//! Durable storage for tracks, playlists and playlist membership.
//!
//! One long-lived SQLite connection is held behind a mutex, so writers are
//! serialized and every mutating call has committed by the time it returns.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::{LibraryError, Result};
use crate::metadata_tags::TrackTags;

pub type TrackId = i64;
pub type PlaylistId = i64;

const PLAYLIST_NAME_PREFIX: &str = "Playlist";

const TRACK_COLUMNS: &str = "id, path, artist, album, genre";

/// One catalogued audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    pub path: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
}

impl Track {
    pub fn tags(&self) -> TrackTags {
        TrackTags::new(&self.artist, &self.album, &self.genre)
    }
}

/// A named playlist row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
}

/// Track columns the catalog can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Artist,
    Album,
    Genre,
}

impl SortColumn {
    fn as_sql(self) -> &'static str {
        match self {
            SortColumn::Artist => "artist",
            SortColumn::Album => "album",
            SortColumn::Genre => "genre",
        }
    }
}

impl std::str::FromStr for SortColumn {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "artist" => Ok(SortColumn::Artist),
            "album" => Ok(SortColumn::Album),
            "genre" => Ok(SortColumn::Genre),
            other => Err(format!("unknown sort column '{}'", other)),
        }
    }
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        path: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        genre: row.get(4)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

/// Escapes `LIKE` wildcards so the query is matched as a literal substring.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// SQLite's `lower()` and `LIKE` only fold ASCII, so searches compare
/// through a Unicode-aware lowercase function instead.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|value| value.to_lowercase()))
        },
    )
}

pub struct LibraryStore {
    conn: Mutex<Connection>,
}

impl LibraryStore {
    /// Opens (creating if needed) the store file at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        info!("LibraryStore: opened {}", path.display());
        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        register_functions(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                artist TEXT NOT NULL,
                album TEXT NOT NULL,
                genre TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS playlist_tracks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                playlist_id INTEGER NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
                track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                UNIQUE (playlist_id, track_id)
            );",
        )?;
        Ok(())
    }

    /// Inserts a track unless its path is already catalogued. The existing row
    /// is never modified.
    pub fn add_track(&self, path: &str, tags: &TrackTags) -> Result<TrackId> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tracks (path, artist, album, genre) VALUES (?1, ?2, ?3, ?4)",
            params![path, tags.artist, tags.album, tags.genre],
        )?;
        if inserted == 0 {
            debug!("LibraryStore: track already present, path={}", path);
        }
        let id = conn.query_row(
            "SELECT id FROM tracks WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Deletes a track and every playlist membership that references it.
    pub fn delete_track(&self, path: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let track_id: TrackId = tx
            .query_row(
                "SELECT id FROM tracks WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| LibraryError::track_not_found(path))?;
        tx.execute(
            "DELETE FROM playlist_tracks WHERE track_id = ?1",
            params![track_id],
        )?;
        tx.execute("DELETE FROM tracks WHERE id = ?1", params![track_id])?;
        tx.commit()?;
        debug!("LibraryStore: deleted track id={} path={}", track_id, path);
        Ok(())
    }

    pub fn update_track_metadata(&self, path: &str, tags: &TrackTags) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE tracks SET artist = ?1, album = ?2, genre = ?3 WHERE path = ?4",
            params![tags.artist, tags.album, tags.genre, path],
        )?;
        if updated == 0 {
            return Err(LibraryError::track_not_found(path));
        }
        Ok(())
    }

    pub fn find_track_by_path(&self, path: &str) -> Result<Option<Track>> {
        let track = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM tracks WHERE path = ?1", TRACK_COLUMNS),
                params![path],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    fn query_tracks(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Track>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, track_from_row)?;
        let mut tracks = Vec::new();
        for track in rows {
            tracks.push(track?);
        }
        Ok(tracks)
    }

    /// All tracks in insertion order.
    pub fn list_all_tracks(&self) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!("SELECT {} FROM tracks ORDER BY id ASC", TRACK_COLUMNS),
            [],
        )
    }

    /// All tracks ascending by `column`; equal values keep insertion order.
    pub fn list_tracks_sorted_by(&self, column: SortColumn) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!(
                "SELECT {} FROM tracks ORDER BY {} ASC, id ASC",
                TRACK_COLUMNS,
                column.as_sql()
            ),
            [],
        )
    }

    /// Tracks whose artist, album or genre contains `query`, ignoring case.
    pub fn search_tracks(&self, query: &str) -> Result<Vec<Track>> {
        self.query_tracks(
            &format!(
                r"SELECT {} FROM tracks
                WHERE unicode_lower(artist) LIKE ?1 ESCAPE '\'
                   OR unicode_lower(album) LIKE ?1 ESCAPE '\'
                   OR unicode_lower(genre) LIKE ?1 ESCAPE '\'
                ORDER BY id ASC",
                TRACK_COLUMNS
            ),
            params![like_pattern(&query.to_lowercase())],
        )
    }

    /// Creates a playlist named `"Playlist {n}"`, n being one past the highest
    /// existing playlist id.
    pub fn create_playlist(&self) -> Result<Playlist> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let max_id: Option<PlaylistId> =
            tx.query_row("SELECT MAX(id) FROM playlists", [], |row| row.get(0))?;
        let mut number = max_id.unwrap_or(0) + 1;
        let name = loop {
            let candidate = format!("{} {}", PLAYLIST_NAME_PREFIX, number);
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM playlists WHERE name = ?1)",
                params![candidate],
                |row| row.get(0),
            )?;
            if !taken {
                break candidate;
            }
            number += 1;
        };
        tx.execute("INSERT INTO playlists (name) VALUES (?1)", params![name])?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!("LibraryStore: created playlist id={} name={}", id, name);
        Ok(Playlist { id, name })
    }

    fn try_rename_playlist(&self, old_name: &str, new_name: &str) -> Result<()> {
        let conn = self.conn();
        let playlist_id: PlaylistId = conn
            .query_row(
                "SELECT id FROM playlists WHERE name = ?1",
                params![old_name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| LibraryError::playlist_not_found(old_name))?;
        match conn.execute(
            "UPDATE playlists SET name = ?1 WHERE id = ?2",
            params![new_name, playlist_id],
        ) {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(LibraryError::Conflict {
                name: new_name.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Renames a playlist. Returns `false` without touching the table when
    /// `old_name` is unknown or `new_name` already belongs to a playlist.
    pub fn rename_playlist(&self, old_name: &str, new_name: &str) -> Result<bool> {
        if old_name == new_name {
            return Ok(false);
        }
        match self.try_rename_playlist(old_name, new_name) {
            Ok(()) => {
                debug!("LibraryStore: renamed playlist {} -> {}", old_name, new_name);
                Ok(true)
            }
            Err(err @ (LibraryError::NotFound { .. } | LibraryError::Conflict { .. })) => {
                debug!("LibraryStore: rename ignored: {}", err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Deletes a playlist and its memberships; member tracks are untouched.
    pub fn delete_playlist(&self, name: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let playlist_id: PlaylistId = tx
            .query_row(
                "SELECT id FROM playlists WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| LibraryError::playlist_not_found(name))?;
        tx.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1",
            params![playlist_id],
        )?;
        tx.execute("DELETE FROM playlists WHERE id = ?1", params![playlist_id])?;
        tx.commit()?;
        debug!("LibraryStore: deleted playlist id={} name={}", playlist_id, name);
        Ok(())
    }

    pub fn find_playlist(&self, name: &str) -> Result<Option<Playlist>> {
        let playlist = self
            .conn()
            .query_row(
                "SELECT id, name FROM playlists WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Playlist {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(playlist)
    }

    pub fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM playlists ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Playlist {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let mut playlists = Vec::new();
        for playlist in rows {
            playlists.push(playlist?);
        }
        Ok(playlists)
    }

    fn resolve_membership_ids(
        conn: &Connection,
        playlist_name: &str,
        track_path: &str,
    ) -> Result<(Option<PlaylistId>, Option<TrackId>)> {
        let playlist_id = conn
            .query_row(
                "SELECT id FROM playlists WHERE name = ?1",
                params![playlist_name],
                |row| row.get(0),
            )
            .optional()?;
        let track_id = conn
            .query_row(
                "SELECT id FROM tracks WHERE path = ?1",
                params![track_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok((playlist_id, track_id))
    }

    /// Adds a track to a playlist. Returns `false` if it was already a member.
    pub fn add_to_playlist(&self, playlist_name: &str, track_path: &str) -> Result<bool> {
        let conn = self.conn();
        let (playlist_id, track_id) =
            Self::resolve_membership_ids(&conn, playlist_name, track_path)?;
        let playlist_id = playlist_id.ok_or_else(|| LibraryError::playlist_not_found(playlist_name))?;
        let track_id = track_id.ok_or_else(|| LibraryError::track_not_found(track_path))?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO playlist_tracks (playlist_id, track_id) VALUES (?1, ?2)",
            params![playlist_id, track_id],
        )?;
        Ok(inserted > 0)
    }

    /// Removes a membership. Returns `false` if there was nothing to remove.
    pub fn remove_from_playlist(&self, playlist_name: &str, track_path: &str) -> Result<bool> {
        let conn = self.conn();
        let (playlist_id, track_id) =
            Self::resolve_membership_ids(&conn, playlist_name, track_path)?;
        let (Some(playlist_id), Some(track_id)) = (playlist_id, track_id) else {
            return Ok(false);
        };
        let removed = conn.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1 AND track_id = ?2",
            params![playlist_id, track_id],
        )?;
        Ok(removed > 0)
    }

    /// Member tracks of a playlist in the order they were added.
    pub fn list_playlist_tracks(&self, playlist_name: &str) -> Result<Vec<Track>> {
        let playlist = self
            .find_playlist(playlist_name)?
            .ok_or_else(|| LibraryError::playlist_not_found(playlist_name))?;
        self.query_tracks(
            "SELECT t.id, t.path, t.artist, t.album, t.genre
            FROM tracks t
            JOIN playlist_tracks pt ON t.id = pt.track_id
            WHERE pt.playlist_id = ?1
            ORDER BY pt.id ASC",
            params![playlist.id],
        )
    }
}
