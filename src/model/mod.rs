//! Persisted entities and their CRUD/search operations.
//!
//! Each entity module owns its DDL (`create_table` / `create_triggers`),
//! constructors and queries; shared plumbing lives in [`crate::db::entity`].

pub mod album;
pub mod album_track;
pub mod artist;
pub mod audio_track;
pub mod device;
pub mod file;
pub mod folder;
pub mod genre;
pub mod history;
pub mod label;
pub mod media;
pub mod movie;
pub mod playlist;
pub mod settings;
pub mod show;

use serde::{Deserialize, Serialize};

use crate::db::cache::EntityPtr;

/// Broad classification of a media entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Unknown,
    Video,
    Audio,
    External,
}

impl MediaType {
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => MediaType::Video,
            2 => MediaType::Audio,
            3 => MediaType::External,
            _ => MediaType::Unknown,
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            MediaType::Unknown => 0,
            MediaType::Video => 1,
            MediaType::Audio => 2,
            MediaType::External => 3,
        }
    }
}

/// Refinement assigned by the metadata stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaSubType {
    Unknown,
    ShowEpisode,
    Movie,
    AlbumTrack,
}

impl MediaSubType {
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => MediaSubType::ShowEpisode,
            2 => MediaSubType::Movie,
            3 => MediaSubType::AlbumTrack,
            _ => MediaSubType::Unknown,
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            MediaSubType::Unknown => 0,
            MediaSubType::ShowEpisode => 1,
            MediaSubType::Movie => 2,
            MediaSubType::AlbumTrack => 3,
        }
    }
}

/// Role of a file with respect to its media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// The file that gets played. Every non-external media has one.
    Main,
    Part,
    Soundtrack,
    Subtitle,
    Playlist,
    External,
}

impl FileType {
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => FileType::Part,
            2 => FileType::Soundtrack,
            3 => FileType::Subtitle,
            4 => FileType::Playlist,
            5 => FileType::External,
            _ => FileType::Main,
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            FileType::Main => 0,
            FileType::Part => 1,
            FileType::Soundtrack => 2,
            FileType::Subtitle => 3,
            FileType::Playlist => 4,
            FileType::External => 5,
        }
    }
}

/// Sort order accepted by the listing endpoints. Ties always break
/// lexicographically on title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortingCriteria {
    #[default]
    Default,
    Alpha,
    Duration,
    InsertionDate,
    ReleaseDate,
    PlayCount,
    Album,
    Filename,
}

/// Media search results split by subtype.
#[derive(Default)]
pub struct MediaSearchAggregate {
    pub tracks: Vec<EntityPtr<media::Media>>,
    pub movies: Vec<EntityPtr<media::Media>>,
    pub episodes: Vec<EntityPtr<media::Media>>,
    pub others: Vec<EntityPtr<media::Media>>,
}

/// Everything matched by [`crate::MediaLibrary::search`].
#[derive(Default)]
pub struct SearchAggregate {
    pub media: MediaSearchAggregate,
    pub albums: Vec<EntityPtr<album::Album>>,
    pub artists: Vec<EntityPtr<artist::Artist>>,
    pub genres: Vec<EntityPtr<genre::Genre>>,
    pub playlists: Vec<EntityPtr<playlist::Playlist>>,
}

/// Search patterns shorter than this return empty aggregates.
pub const MIN_SEARCH_PATTERN: usize = 3;

pub(crate) fn validate_search_pattern(pattern: &str) -> bool {
    pattern.chars().count() >= MIN_SEARCH_PATTERN
}

/// Escape a user pattern for an FTS prefix MATCH.
pub(crate) fn fts_prefix_query(pattern: &str) -> String {
    format!("\"{}\"*", pattern.replace('"', ""))
}
