//! Best-effort tag readers backed by `lofty`.
//!
//! Extraction is total: any failure to open or parse a file yields the
//! `Unknown ...` sentinels instead of an error.

use std::path::Path;

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::read_from_path;
use lofty::tag::Tag;
use log::debug;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_GENRE: &str = "Unknown Genre";

/// Catalog metadata stored for every track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub artist: String,
    pub album: String,
    pub genre: String,
}

impl Default for TrackTags {
    fn default() -> Self {
        Self {
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            genre: UNKNOWN_GENRE.to_string(),
        }
    }
}

impl TrackTags {
    pub fn new(artist: impl Into<String>, album: impl Into<String>, genre: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            album: album.into(),
            genre: genre.into(),
        }
    }
}

/// Source of catalog metadata for a file path.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> TrackTags;
}

/// Production reader that parses embedded tags with `lofty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path) -> TrackTags {
        extract(path)
    }
}

fn first_non_empty_value<F>(primary_tag: Option<&Tag>, tags: &[Tag], mut extractor: F) -> Option<String>
where
    F: FnMut(&Tag) -> Option<String>,
{
    primary_tag
        .into_iter()
        .chain(tags.iter())
        .filter_map(&mut extractor)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn or_sentinel(value: Option<String>, sentinel: &str) -> String {
    value.unwrap_or_else(|| sentinel.to_string())
}

/// Reads artist, album and genre from `path`, substituting sentinels for
/// anything missing or unreadable.
pub fn extract(path: &Path) -> TrackTags {
    let tagged_file = match read_from_path(path) {
        Ok(tagged_file) => tagged_file,
        Err(err) => {
            debug!(
                "Metadata: falling back to defaults for {}: {}",
                path.display(),
                err
            );
            return TrackTags::default();
        }
    };
    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    let artist = first_non_empty_value(primary_tag, tags, |tag| {
        tag.artist().map(|value| value.into_owned())
    });
    let album = first_non_empty_value(primary_tag, tags, |tag| {
        tag.album().map(|value| value.into_owned())
    });
    let genre = first_non_empty_value(primary_tag, tags, |tag| {
        tag.genre().map(|value| value.into_owned())
    });

    TrackTags {
        artist: or_sentinel(artist, UNKNOWN_ARTIST),
        album: or_sentinel(album, UNKNOWN_ALBUM),
        genre: or_sentinel(genre, UNKNOWN_GENRE),
    }
}

/// Reads the stream duration of a media file, if it can be parsed.
pub fn probe_duration_ms(path: &Path) -> Option<u64> {
    let tagged_file = read_from_path(path).ok()?;
    let duration_ms = tagged_file.properties().duration().as_millis() as u64;
    (duration_ms > 0).then_some(duration_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use lofty::config::WriteOptions;
    use lofty::tag::TagType;
    use tempfile::TempDir;

    fn write_silent_wav(path: &Path, seconds: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).expect("failed to create wav");
        for _ in 0..(spec.sample_rate * seconds) {
            writer.write_sample(0i16).expect("failed to write sample");
        }
        writer.finalize().expect("failed to finalize wav");
    }

    fn tag_wav(path: &Path, artist: &str, album: &str, genre: &str) {
        let mut tagged_file = read_from_path(path).expect("failed to read wav");
        let mut tag = Tag::new(TagType::Id3v2);
        tag.set_artist(artist.to_string());
        tag.set_album(album.to_string());
        tag.set_genre(genre.to_string());
        tagged_file.insert_tag(tag);
        tagged_file
            .save_to_path(path, WriteOptions::default())
            .expect("failed to save tags");
    }

    #[test]
    fn test_extract_reads_embedded_tags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dunkelheit.wav");
        write_silent_wav(&path, 1);
        tag_wav(&path, "Burzum", "Filosofem", "Black Metal / Dark Ambient");

        let tags = extract(&path);

        assert_eq!(
            tags,
            TrackTags::new("Burzum", "Filosofem", "Black Metal / Dark Ambient")
        );
    }

    #[test]
    fn test_extract_fills_missing_fields_with_sentinels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.wav");
        write_silent_wav(&path, 1);
        tag_wav(&path, "Burzum", "  ", "");

        let tags = extract(&path);

        assert_eq!(tags.artist, "Burzum");
        assert_eq!(tags.album, UNKNOWN_ALBUM);
        assert_eq!(tags.genre, UNKNOWN_GENRE);
    }

    #[test]
    fn test_extract_corrupt_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.mp3");
        std::fs::write(&path, b"definitely not an mpeg frame").unwrap();

        assert_eq!(
            extract(&path),
            TrackTags::new("Unknown Artist", "Unknown Album", "Unknown Genre")
        );
    }

    #[test]
    fn test_extract_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(extract(&dir.path().join("gone.flac")), TrackTags::default());
    }

    #[test]
    fn test_duration_of_untagged_wav() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("two_seconds.wav");
        write_silent_wav(&path, 2);

        let duration = probe_duration_ms(&path).expect("duration should be readable");
        assert!((1990..=2010).contains(&duration), "duration was {}", duration);
        assert_eq!(probe_duration_ms(&dir.path().join("missing.wav")), None);
    }
}
