//! Last pipeline stage: give the media a preview image.
//!
//! Audio artwork comes from the file's embedded pictures. Video frames
//! need the decoding collaborator; without one, video media simply keep no
//! thumbnail.

use std::sync::Arc;

use lofty::prelude::*;
use lofty::probe::Probe;
use tracing::{debug, warn};

use crate::core::Core;
use crate::db::entity::DatabaseEntity;
use crate::error::Result;
use crate::model::media::MediaPtr;
use crate::model::MediaType;
use crate::parser::service::ParserService;
use crate::parser::task::{step, ParseTask, TaskStatus};
use crate::utils::mrl;

pub struct ThumbnailerService;

impl ParserService for ThumbnailerService {
    fn name(&self) -> &'static str {
        "thumbnailer"
    }

    fn step(&self) -> u8 {
        step::THUMBNAIL
    }

    fn run(&self, core: &Arc<Core>, task: &mut ParseTask) -> TaskStatus {
        let media = match task.media.clone() {
            Some(m) => m,
            None => return TaskStatus::Fatal,
        };
        let result = match media.read().media_type() {
            MediaType::Audio => self.audio_thumbnail(core, task, &media),
            MediaType::Video => self.video_thumbnail(core, task, &media),
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(mrl = %task.mrl, "thumbnail generation failed: {}", err);
            return TaskStatus::Error;
        }
        task.mark_step_completed(step::THUMBNAIL);
        if task.save_parser_step(core).is_err() {
            return TaskStatus::Error;
        }
        TaskStatus::Success
    }
}

impl ThumbnailerService {
    /// First embedded picture of the file, if any.
    fn audio_thumbnail(&self, core: &Core, task: &ParseTask, media: &MediaPtr) -> Result<()> {
        if media.read().thumbnail().is_some() {
            return Ok(());
        }
        let path = match mrl::to_path(&task.mrl) {
            Some(p) => p,
            None => return Ok(()),
        };
        let tagged = match Probe::open(&path).and_then(|p| p.read()) {
            Ok(t) => t,
            Err(err) => {
                debug!(mrl = %task.mrl, "no readable artwork: {}", err);
                return Ok(());
            }
        };
        let tag = match tagged.primary_tag().or_else(|| tagged.first_tag()) {
            Some(t) => t,
            None => return Ok(()),
        };
        let pictures = tag.pictures();
        if pictures.is_empty() {
            return Ok(());
        }
        let picture = &pictures[0];
        let extension = match picture.mime_type() {
            Some(lofty::picture::MimeType::Png) => "png",
            _ => "jpg",
        };
        self.write_thumbnail(core, media, picture.data(), extension)
    }

    /// Delegate frame rendering to the collaborator, when one is
    /// registered.
    fn video_thumbnail(&self, core: &Core, task: &ParseTask, media: &MediaPtr) -> Result<()> {
        if media.read().thumbnail().is_some() {
            return Ok(());
        }
        let extractor = match core.frame_extractor.read().clone() {
            Some(e) => e,
            None => return Ok(()),
        };
        match extractor.extract_frame(&task.mrl) {
            Some(bytes) => self.write_thumbnail(core, media, &bytes, "jpg"),
            None => Ok(()),
        }
    }

    fn write_thumbnail(
        &self,
        core: &Core,
        media: &MediaPtr,
        bytes: &[u8],
        extension: &str,
    ) -> Result<()> {
        let dir = core.thumbnail_dir();
        let path = dir.join(format!("{}.{}", media.read().id(), extension));
        std::fs::write(&path, bytes)?;
        media.write().set_thumbnail(core, &mrl::from_path(&path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsFactory, VideoFrameExtractor};
    use crate::model::MediaType;
    use crate::test_utils::TestLibrary;

    struct SolidFrame;

    impl VideoFrameExtractor for SolidFrame {
        fn extract_frame(&self, _mrl: &str) -> Option<Vec<u8>> {
            Some(vec![0xff, 0xd8, 0xff, 0xe0])
        }
    }

    fn video_task(t: &TestLibrary, file_mrl: &str) -> Box<ParseTask> {
        let (media, file) = t.add_media_at(file_mrl, MediaType::Video);
        let folder = t.ensure_folder(&mrl::directory(file_mrl));
        let dir_fs = t.fs.create_directory(&mrl::directory(file_mrl)).unwrap();
        let fs_file = dir_fs
            .files()
            .unwrap()
            .into_iter()
            .find(|f| f.mrl() == file_mrl)
            .unwrap();
        let mut task = ParseTask::create(t.core(), fs_file, folder, dir_fs, None).unwrap();
        task.media = Some(media);
        task.file = Some(file);
        task
    }

    #[test]
    fn video_frames_come_from_the_collaborator() {
        let t = TestLibrary::new();
        *t.core().frame_extractor.write() = Some(std::sync::Arc::new(SolidFrame));
        let mut task = video_task(&t, "file:///videos/clip.mkv");

        assert_eq!(
            ThumbnailerService.run(t.core(), &mut task),
            TaskStatus::Success
        );
        let media = task.media.as_ref().unwrap();
        let thumbnail = media.read().thumbnail().unwrap().to_string();
        let path = mrl::to_path(&thumbnail).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), vec![0xff, 0xd8, 0xff, 0xe0]);
    }

    #[test]
    fn video_without_a_collaborator_completes_without_a_thumbnail() {
        let t = TestLibrary::new();
        let mut task = video_task(&t, "file:///videos/bare.mkv");
        assert_eq!(
            ThumbnailerService.run(t.core(), &mut task),
            TaskStatus::Success
        );
        assert!(task.is_step_completed(step::THUMBNAIL));
        assert!(task.media.as_ref().unwrap().read().thumbnail().is_none());
    }
}
