//! Schema orchestration: tables and triggers are created in dependency
//! order, devices first. A presence update on a device propagates to
//! folders, then files, then media, tracks, albums and artists, so the
//! triggers must exist bottom-up before any of that fires.

use rusqlite::Connection;

use crate::error::Result;
use crate::model::album::Album;
use crate::model::album_track::AlbumTrack;
use crate::model::artist::Artist;
use crate::model::audio_track::AudioTrack;
use crate::model::device::Device;
use crate::model::file::File;
use crate::model::folder::Folder;
use crate::model::genre::Genre;
use crate::model::history::History;
use crate::model::label::Label;
use crate::model::media::Media;
use crate::model::movie::Movie;
use crate::model::playlist::Playlist;
use crate::model::settings::Settings;
use crate::model::show::{Show, ShowEpisode};
use crate::parser::task::ParseTask;

/// Create every table. Idempotent.
pub fn create_all_tables(conn: &Connection) -> Result<()> {
    Device::create_table(conn)?;
    Folder::create_table(conn)?;
    Media::create_table(conn)?;
    Playlist::create_table(conn)?;
    File::create_table(conn)?;
    Label::create_table(conn)?;
    Genre::create_table(conn)?;
    Artist::create_table(conn)?;
    Album::create_table(conn)?;
    AlbumTrack::create_table(conn)?;
    Show::create_table(conn)?;
    ShowEpisode::create_table(conn)?;
    Movie::create_table(conn)?;
    AudioTrack::create_table(conn)?;
    Artist::create_default_artists(conn)?;
    History::create_table(conn)?;
    Settings::create_table(conn)?;
    ParseTask::create_table(conn)?;
    Ok(())
}

/// Create every trigger and auxiliary index. Idempotent.
pub fn create_all_triggers(conn: &Connection, model_version: u32) -> Result<()> {
    Folder::create_triggers(conn)?;
    Album::create_triggers(conn)?;
    AlbumTrack::create_triggers(conn)?;
    Artist::create_triggers(conn, model_version)?;
    Media::create_triggers(conn)?;
    File::create_triggers(conn)?;
    Genre::create_triggers(conn)?;
    Playlist::create_triggers(conn)?;
    History::create_triggers(conn)?;
    Ok(())
}
