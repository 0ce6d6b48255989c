//! Second pipeline stage: resolve tags into the entity graph — albums,
//! artists, genres and track links for audio; movies and show episodes for
//! video.

use std::sync::Arc;

use lofty::prelude::*;
use lofty::probe::Probe;
use tracing::{debug, warn};

use crate::core::Core;
use crate::db::entity::DatabaseEntity;
use crate::error::Result;
use crate::model::album::{Album, AlbumPtr};
use crate::model::album_track::AlbumTrack;
use crate::model::artist::{Artist, ArtistPtr, UNKNOWN_ARTIST_ID, VARIOUS_ARTISTS_ID};
use crate::model::genre::Genre;
use crate::model::media::MediaPtr;
use crate::model::movie::Movie;
use crate::model::show::Show;
use crate::model::{MediaSubType, MediaType};
use crate::parser::service::ParserService;
use crate::parser::task::{step, ParseTask, TaskStatus};
use crate::utils::mrl;

pub struct MetadataParserService;

impl ParserService for MetadataParserService {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn step(&self) -> u8 {
        step::METADATA
    }

    fn run(&self, core: &Arc<Core>, task: &mut ParseTask) -> TaskStatus {
        let media = match task.media.clone() {
            Some(m) => m,
            None => return TaskStatus::Fatal,
        };
        let outcome = match media.read().media_type() {
            MediaType::Audio => self.link_audio(core, task, &media),
            MediaType::Video => self.link_video(core, &media),
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            if err.is_busy() {
                return TaskStatus::Error;
            }
            warn!(mrl = %task.mrl, "metadata extraction failed: {}", err);
            return TaskStatus::Error;
        }

        if let Some(playlist) = task.parent_playlist.clone() {
            let added = playlist
                .read()
                .add(core, media.read().id(), task.parent_playlist_index);
            if let Err(err) = added {
                warn!(mrl = %task.mrl, "failed to attach media to playlist: {}", err);
            }
        }

        task.mark_step_completed(step::METADATA);
        if task.save_parser_step(core).is_err() {
            return TaskStatus::Error;
        }
        TaskStatus::Success
    }
}

#[derive(Default)]
struct Tags {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    album_artist: Option<String>,
    genre: Option<String>,
    track_number: Option<i64>,
    disc_number: Option<i64>,
    year: Option<i64>,
}

fn read_tags(target: &str) -> Tags {
    let path = match mrl::to_path(target) {
        Some(p) => p,
        None => return Tags::default(),
    };
    let tagged = match Probe::open(&path).and_then(|p| p.read()) {
        Ok(t) => t,
        Err(err) => {
            debug!(mrl = %target, "no readable tags: {}", err);
            return Tags::default();
        }
    };
    let tag = match tagged.primary_tag().or_else(|| tagged.first_tag()) {
        Some(t) => t,
        None => return Tags::default(),
    };
    Tags {
        title: tag.title().map(|t| t.into_owned()),
        artist: tag.artist().map(|t| t.into_owned()),
        album: tag.album().map(|t| t.into_owned()),
        album_artist: tag
            .get_string(&ItemKey::AlbumArtist)
            .map(str::to_string),
        genre: tag.genre().map(|t| t.into_owned()),
        track_number: tag.track().map(i64::from),
        disc_number: tag.disk().map(i64::from),
        year: tag.year().map(i64::from),
    }
}

impl MetadataParserService {
    fn find_or_create_artist(&self, core: &Core, name: &str) -> Result<ArtistPtr> {
        match Artist::by_name(core, name)? {
            Some(artist) => Ok(artist),
            None => match Artist::create(core, name) {
                Ok(artist) => Ok(artist),
                Err(err) if err.is_constraint() => {
                    Artist::by_name(core, name)?.ok_or(err)
                }
                Err(err) => Err(err),
            },
        }
    }

    fn link_audio(&self, core: &Core, task: &ParseTask, media: &MediaPtr) -> Result<()> {
        let tags = read_tags(&task.mrl);
        if let Some(title) = &tags.title {
            media.write().set_title(core, title)?;
        }

        // Re-parses keep the existing link; tags were already resolved.
        if AlbumTrack::from_media(core, media.read().id())?.is_some() {
            return Ok(());
        }

        let tag_artist = match &tags.artist {
            Some(name) => Some(self.find_or_create_artist(core, name)?),
            None => None,
        };
        let album_artist = match &tags.album_artist {
            Some(name) => Some(self.find_or_create_artist(core, name)?),
            None => None,
        };
        let track_artist = match tag_artist.clone().or_else(|| album_artist.clone()) {
            Some(artist) => artist,
            None => Artist::fetch(core, UNKNOWN_ARTIST_ID)?
                .expect("the reserved artists always exist"),
        };

        let album = self.resolve_album(core, &tags, album_artist.as_ref(), &track_artist)?;
        if let Some(year) = tags.year {
            album.write().set_release_year(core, year, false)?;
            media.write().set_release_date(core, year)?;
        }
        let genre = match &tags.genre {
            Some(name) => Some(Genre::from_name(core, name)?),
            None => None,
        };

        AlbumTrack::create(
            core,
            media,
            &album,
            Some(&track_artist),
            genre.map(|g| g.read().id()),
            tags.track_number.unwrap_or(0),
            tags.disc_number.unwrap_or(1),
        )?;
        Ok(())
    }

    fn resolve_album(
        &self,
        core: &Core,
        tags: &Tags,
        album_artist: Option<&ArtistPtr>,
        track_artist: &ArtistPtr,
    ) -> Result<AlbumPtr> {
        let title = match &tags.album {
            Some(title) => title,
            None => return track_artist.read().unknown_album(core),
        };
        let credited = album_artist.unwrap_or(track_artist);
        let credited_id = credited.read().id();

        if let Some(album) = Album::from_title_and_artist(core, title, Some(credited_id))? {
            return Ok(album);
        }
        if let Some(album) = Album::from_title_and_artist(core, title, None)? {
            // Same album title with a different artist: a compilation.
            let various = Artist::fetch(core, VARIOUS_ARTISTS_ID)?
                .expect("the reserved artists always exist");
            album.write().set_album_artist(core, &various)?;
            return Ok(album);
        }
        let album = Album::create(core, title, None)?;
        album.write().set_album_artist(core, credited)?;
        Ok(album)
    }

    fn link_video(&self, core: &Core, media: &MediaPtr) -> Result<()> {
        if media.read().subtype() != MediaSubType::Unknown {
            return Ok(());
        }
        let guessed = sanitize_title(media.read().file_name());
        match episode_pattern(&guessed) {
            Some((show_name, season, episode)) => {
                let show = match Show::by_name(core, &show_name)? {
                    Some(show) => show,
                    None => Show::create(core, &show_name)?,
                };
                show.read()
                    .add_episode(core, media.read().id(), &guessed, season, episode)?;
                media.write().set_title(core, &guessed)?;
                media.write().set_subtype(core, MediaSubType::ShowEpisode)?;
            }
            None => {
                let movie = match Movie::by_title(core, &guessed)? {
                    Some(movie) => Some(movie),
                    None => match Movie::create(core, media.read().id(), &guessed) {
                        Ok(movie) => Some(movie),
                        Err(err) if err.is_constraint() => Movie::by_title(core, &guessed)?,
                        Err(err) => return Err(err),
                    },
                };
                if movie.is_some() {
                    media.write().set_title(core, &guessed)?;
                    media.write().set_subtype(core, MediaSubType::Movie)?;
                }
            }
        }
        Ok(())
    }
}

/// Turn a file name into a displayable title: strip the extension, turn
/// separator characters into spaces.
fn sanitize_title(file_name: &str) -> String {
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };
    let cleaned: String = stem
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Detect a `S01E02`-style episode marker. Returns the show name (the part
/// before the marker) and the season/episode numbers.
fn episode_pattern(title: &str) -> Option<(String, i64, i64)> {
    let lower = title.to_lowercase();
    let bytes = lower.as_bytes();
    for (idx, _) in lower.match_indices('s') {
        if idx > 0 && bytes[idx - 1].is_ascii_alphanumeric() {
            continue;
        }
        let rest = &lower[idx + 1..];
        let season_digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if season_digits.is_empty() || season_digits.len() > 2 {
            continue;
        }
        let after_season = &rest[season_digits.len()..];
        let Some(after_e) = after_season.strip_prefix('e') else {
            continue;
        };
        let episode_digits: String = after_e.chars().take_while(|c| c.is_ascii_digit()).collect();
        if episode_digits.is_empty() || episode_digits.len() > 3 {
            continue;
        }
        let show_name = title[..idx].trim().trim_end_matches('-').trim();
        if show_name.is_empty() {
            continue;
        }
        return Some((
            show_name.to_string(),
            season_digits.parse().ok()?,
            episode_digits.parse().ok()?,
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_separators_and_strips_extension() {
        assert_eq!(sanitize_title("Some.Movie.2019.mkv"), "Some Movie 2019");
        assert_eq!(sanitize_title("my_track.mp3"), "my track");
        assert_eq!(sanitize_title("noext"), "noext");
    }

    #[test]
    fn episode_markers_are_detected() {
        let (show, season, episode) = episode_pattern("My Show S02E05").unwrap();
        assert_eq!(show, "My Show");
        assert_eq!(season, 2);
        assert_eq!(episode, 5);

        let (show, season, episode) = episode_pattern("other show - s1e12 final").unwrap();
        assert_eq!(show, "other show");
        assert_eq!(season, 1);
        assert_eq!(episode, 12);

        assert!(episode_pattern("Movie Title 2019").is_none());
        assert!(episode_pattern("Mission 3").is_none());
    }
}
