//! First pipeline stage: classify the file, create its media/file rows and
//! extract container-level properties (duration, codec) where the format
//! allows it without a decoder.
//!
//! Playlist files are expanded here: every resolvable entry becomes a
//! child task carrying the playlist reference and its position.

use std::sync::Arc;

use lofty::prelude::*;
use lofty::probe::Probe;
use tracing::{debug, warn};

use crate::core::Core;
use crate::db::entity::DatabaseEntity;
use crate::error::Result;
use crate::extensions;
use crate::model::audio_track::AudioTrack;
use crate::model::file::{File, FilePtr};
use crate::model::media::{Media, MediaPtr};
use crate::model::playlist::{Playlist, PlaylistPtr};
use crate::model::{FileType, MediaType};
use crate::parser::service::ParserService;
use crate::parser::task::{step, ParseTask, TaskStatus};
use crate::utils::mrl;

pub struct ProbeService;

impl ParserService for ProbeService {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn step(&self) -> u8 {
        step::PROBE
    }

    fn run(&self, core: &Arc<Core>, task: &mut ParseTask) -> TaskStatus {
        let file_fs = match task.file_fs.clone() {
            Some(f) => f,
            None => return TaskStatus::Fatal,
        };
        let extension = file_fs.extension().unwrap_or_default();
        if extensions::is_playlist(&extension) {
            return self.probe_playlist(core, task, &extension);
        }
        match self.probe_media(core, task, &extension) {
            Ok(status) => status,
            Err(err) if err.is_busy() => TaskStatus::Error,
            Err(err) => {
                warn!(mrl = %task.mrl, "probe failed: {}", err);
                TaskStatus::Error
            }
        }
    }
}

impl ProbeService {
    fn probe_media(
        &self,
        core: &Arc<Core>,
        task: &mut ParseTask,
        extension: &str,
    ) -> Result<TaskStatus> {
        let file_fs = task.file_fs.clone().expect("checked by run");
        let media = match task.media.clone() {
            Some(media) => media,
            None => match self.create_media_and_file(core, task, extension)? {
                Some(media) => media,
                None => return Ok(TaskStatus::Fatal),
            },
        };

        if let Some(path) = mrl::to_path(&file_fs.mrl()) {
            match Probe::open(&path).and_then(|p| p.read()) {
                Ok(tagged) => {
                    let properties = tagged.properties();
                    let duration = properties.duration().as_millis() as i64;
                    if duration > 0 {
                        media.write().set_duration(core, duration)?;
                    }
                    if media.read().media_type() == MediaType::Audio
                        && AudioTrack::from_media(core, media.read().id())?.is_empty()
                    {
                        let codec = format!("{:?}", tagged.file_type()).to_lowercase();
                        AudioTrack::create(
                            core,
                            Some(&codec),
                            properties.audio_bitrate().unwrap_or(0) as i64,
                            properties.sample_rate().unwrap_or(0) as i64,
                            properties.channels().unwrap_or(0) as i64,
                            None,
                            None,
                            media.read().id(),
                        )?;
                    }
                }
                Err(err) => {
                    // Unreadable containers are not an error: video formats
                    // get their properties from the decoding collaborator.
                    debug!(mrl = %task.mrl, "container probe failed: {}", err);
                }
            }
        }

        task.mark_step_completed(step::PROBE);
        task.save_parser_step(core)?;
        Ok(TaskStatus::Success)
    }

    /// Create the media row and its main file atomically. Returns `None`
    /// when the task has no usable parent folder.
    fn create_media_and_file(
        &self,
        core: &Arc<Core>,
        task: &mut ParseTask,
        extension: &str,
    ) -> Result<Option<MediaPtr>> {
        let file_fs = task.file_fs.clone().expect("checked by run");
        let parent_folder = match task.parent_folder.clone() {
            Some(f) => f,
            None => return Ok(None),
        };
        let folder_id = parent_folder.read().id();
        let is_removable = parent_folder.read().is_removable();
        let media_type = extensions::media_type_for(extension);

        let created: Result<(MediaPtr, FilePtr)> = core.db.transaction(|_| {
            let media = Media::create(core, media_type, file_fs.name())?;
            let file = File::create_from_media(
                core,
                media.read().id(),
                FileType::Main,
                file_fs.as_ref(),
                folder_id,
                is_removable,
            )?;
            Ok((media, file))
        });
        match created {
            Ok((media, file)) => {
                task.set_file(core, file)?;
                task.media = Some(media.clone());
                Ok(Some(media))
            }
            Err(err) if err.is_constraint() => {
                // Already catalogued (prior run or crash); reuse the rows.
                let file = if is_removable {
                    File::from_file_name(core, file_fs.name(), folder_id)?
                } else {
                    File::from_mrl(core, &file_fs.mrl())?
                };
                match file {
                    Some(file) => {
                        let media = file.read().media(core)?;
                        task.set_file(core, file)?;
                        task.media = media.clone();
                        Ok(media)
                    }
                    None => Ok(None),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn probe_playlist(
        &self,
        core: &Arc<Core>,
        task: &mut ParseTask,
        extension: &str,
    ) -> TaskStatus {
        match self.probe_playlist_inner(core, task, extension) {
            Ok(status) => status,
            Err(err) => {
                warn!(mrl = %task.mrl, "playlist probe failed: {}", err);
                TaskStatus::Error
            }
        }
    }

    fn probe_playlist_inner(
        &self,
        core: &Arc<Core>,
        task: &mut ParseTask,
        extension: &str,
    ) -> Result<TaskStatus> {
        let file_fs = task.file_fs.clone().expect("checked by run");
        let parent_folder = match task.parent_folder.clone() {
            Some(f) => f,
            None => return Ok(TaskStatus::Fatal),
        };
        let folder_id = parent_folder.read().id();
        let is_removable = parent_folder.read().is_removable();

        let playlist = match self.find_or_create_playlist(
            core,
            &file_fs.mrl(),
            file_fs.name(),
            folder_id,
            is_removable,
            task,
        )? {
            Some(p) => p,
            None => return Ok(TaskStatus::Fatal),
        };

        // Only the plain-text playlist formats are expanded.
        if matches!(extension, "m3u" | "m3u8") {
            self.expand_m3u(core, task, &playlist)?;
        }

        // A playlist file needs neither metadata nor a thumbnail.
        task.mark_step_completed(step::COMPLETED);
        task.save_parser_step(core)?;
        Ok(TaskStatus::Success)
    }

    fn find_or_create_playlist(
        &self,
        core: &Arc<Core>,
        playlist_mrl: &str,
        name: &str,
        folder_id: i64,
        is_removable: bool,
        task: &mut ParseTask,
    ) -> Result<Option<PlaylistPtr>> {
        if let Some(file) = &task.file {
            let playlist_id = file.read().playlist_id();
            if let Some(id) = playlist_id {
                return Playlist::fetch(core, id);
            }
        }
        let file_fs = task.file_fs.clone().expect("checked by run");
        let created: Result<(PlaylistPtr, FilePtr)> = core.db.transaction(|_| {
            let playlist = match Playlist::create(core, name) {
                Ok(p) => p,
                // The name is taken; fall back to the full MRL, which is
                // unique per playlist file.
                Err(err) if err.is_constraint() => Playlist::create(core, playlist_mrl)?,
                Err(err) => return Err(err),
            };
            let file = File::create_from_playlist(
                core,
                playlist.read().id(),
                file_fs.as_ref(),
                folder_id,
                is_removable,
            )?;
            playlist.write().set_file(core, file.read().id())?;
            Ok((playlist, file))
        });
        match created {
            Ok((playlist, file)) => {
                task.set_file(core, file)?;
                Ok(Some(playlist))
            }
            Err(err) if err.is_constraint() => {
                // The file row already exists from a previous pass.
                let file = if is_removable {
                    File::from_file_name(core, name, folder_id)?
                } else {
                    File::from_mrl(core, playlist_mrl)?
                };
                match file {
                    Some(file) => {
                        let playlist_id = file.read().playlist_id();
                        task.set_file(core, file)?;
                        match playlist_id {
                            Some(id) => Playlist::fetch(core, id),
                            None => Ok(None),
                        }
                    }
                    None => Ok(None),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Parse the playlist entries and schedule a child task per resolvable
    /// entry, carrying the playlist reference and the entry position.
    fn expand_m3u(
        &self,
        core: &Arc<Core>,
        task: &ParseTask,
        playlist: &PlaylistPtr,
    ) -> Result<()> {
        let file_fs = task.file_fs.clone().expect("checked by run");
        let path = match mrl::to_path(&file_fs.mrl()) {
            Some(p) => p,
            None => return Ok(()),
        };
        let contents = std::fs::read_to_string(path)?;
        let base = mrl::directory(&file_fs.mrl());
        let parent_folder = task.parent_folder.clone().expect("checked by caller");
        let parent_folder_fs = match task.parent_folder_fs.clone() {
            Some(d) => d,
            None => return Ok(()),
        };

        let mut position = 0i64;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry_mrl = if mrl::scheme(line).is_some() {
                line.to_string()
            } else {
                format!("{}{}", base, mrl::encode(line))
            };
            if mrl::directory(&entry_mrl) != parent_folder_fs.mrl() {
                debug!(entry = %entry_mrl, "skipping playlist entry outside its folder");
                continue;
            }
            let entry_fs = parent_folder_fs
                .files()
                .unwrap_or_default()
                .into_iter()
                .find(|f| f.mrl() == entry_mrl);
            let entry_fs = match entry_fs {
                Some(f) => f,
                None => {
                    debug!(entry = %entry_mrl, "playlist entry not found on disk");
                    continue;
                }
            };
            match ParseTask::create(
                core,
                entry_fs,
                parent_folder.clone(),
                parent_folder_fs.clone(),
                Some((playlist.clone(), position)),
            ) {
                Ok(child) => {
                    if let Some(parser) = core.parser() {
                        parser.parse(child);
                    }
                }
                Err(err) if err.is_constraint() => {
                    debug!(entry = %entry_mrl, "playlist entry already scheduled");
                }
                Err(err) => return Err(err),
            }
            position += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NoopCallback;
    use crate::discoverer::fs_discoverer::FsDiscoverer;
    use crate::library::MediaLibrary;
    use crate::parser::metadata::MetadataParserService;
    use crate::parser::service::ParserService;

    /// A library over the real local filesystem, rooted in a temp dir.
    fn local_library() -> (MediaLibrary, tempfile::TempDir, tempfile::TempDir) {
        let media_dir = tempfile::tempdir().unwrap();
        let thumb_dir = tempfile::tempdir().unwrap();
        let mut ml = MediaLibrary::new();
        let result = ml.initialize_in_memory(
            thumb_dir.path().to_str().unwrap(),
            Some(Arc::new(NoopCallback)),
        );
        assert_eq!(result, crate::callbacks::InitResult::Success);
        (ml, media_dir, thumb_dir)
    }

    #[test]
    fn m3u_files_become_playlists_with_positioned_entries() {
        let (ml, media_dir, _thumbs) = local_library();
        std::fs::write(media_dir.path().join("a.mp3"), b"not really audio").unwrap();
        std::fs::write(media_dir.path().join("b.mp3"), b"not really audio").unwrap();
        std::fs::write(
            media_dir.path().join("mix.m3u"),
            "#EXTM3U\nb.mp3\na.mp3\nmissing.mp3\n",
        )
        .unwrap();

        let core = ml.core().clone();
        let dir_mrl = format!("{}/", mrl::from_path(media_dir.path()));
        let discoverer = FsDiscoverer::new(core.clone());
        assert!(discoverer.discover(&dir_mrl).unwrap());

        let mut tasks = ParseTask::fetch_unparsed(&core).unwrap();
        assert_eq!(tasks.len(), 3);
        let playlist_task = tasks
            .iter_mut()
            .find(|t| t.mrl.ends_with(".m3u"))
            .expect("the playlist file was discovered");
        assert!(playlist_task.restore_linked_entities(&core).unwrap());
        assert_eq!(
            ProbeService.run(&core, playlist_task),
            TaskStatus::Success
        );
        assert!(playlist_task.is_completed());

        let playlists =
            Playlist::list_all(&core, crate::model::SortingCriteria::Default, false).unwrap();
        assert_eq!(playlists.len(), 1);
        let playlist = &playlists[0];
        assert!(playlist.read().file_id().is_some());

        // Resolvable entries became child tasks carrying their position;
        // the missing one was skipped.
        let children = ParseTask::fetch_unparsed(&core)
            .unwrap()
            .into_iter()
            .filter(|t| t.parent_playlist_id.is_some())
            .collect::<Vec<_>>();
        assert_eq!(children.len(), 2);

        // Driving a child through probe + metadata attaches the media at
        // its playlist position.
        for mut child in children {
            assert!(child.restore_linked_entities(&core).unwrap());
            assert_eq!(ProbeService.run(&core, &mut child), TaskStatus::Success);
            assert_eq!(
                MetadataParserService.run(&core, &mut child),
                TaskStatus::Success
            );
        }
        let members: Vec<String> = playlist
            .read()
            .media(&core)
            .unwrap()
            .iter()
            .map(|m| m.read().file_name().to_string())
            .collect();
        assert_eq!(members, vec!["b.mp3", "a.mp3"]);
    }

    #[test]
    fn unreadable_media_still_get_catalogued() {
        let (ml, media_dir, _thumbs) = local_library();
        std::fs::write(media_dir.path().join("garbage.mp3"), b"zzzz").unwrap();

        let core = ml.core().clone();
        let dir_mrl = format!("{}/", mrl::from_path(media_dir.path()));
        let discoverer = FsDiscoverer::new(core.clone());
        assert!(discoverer.discover(&dir_mrl).unwrap());

        let mut tasks = ParseTask::fetch_unparsed(&core).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].restore_linked_entities(&core).unwrap());
        assert_eq!(ProbeService.run(&core, &mut tasks[0]), TaskStatus::Success);
        let media = tasks[0].media.as_ref().unwrap();
        // The container is unreadable but the entry exists, typed by
        // extension, with no duration.
        assert_eq!(media.read().media_type(), MediaType::Audio);
        assert_eq!(media.read().duration(), -1);
    }
}
