// Last parser service: poster-frame generation.
//
// Audio media keep their embedded artwork (extracted rather than decoded);
// an Unknown media that still has no video stream is reclassified as Audio
// and the step completes without writing an image. Decode timeouts are
// fatal; the task is never retried into the same stall.

use std::path::PathBuf;

use crate::catalog::media::{self, MediaType};
use crate::catalog::task::{self, Task, STEP_THUMBNAILER};
use crate::catalog::{album, album_track, artist, file};
use crate::constants::{DB_BUSY_RETRIES, THUMBNAIL_EXTENSION};
use crate::core::Core;
use crate::db;
use crate::error::MediaLibError;
use crate::mrl;
use crate::notifier::{Change, Entity};
use crate::probe;
use crate::thumbnail;

use super::service::{ParserService, Status};

pub(crate) struct Thumbnailer;

impl ParserService for Thumbnailer {
    fn name(&self) -> &'static str {
        "Thumbnailer"
    }

    fn nb_threads(&self) -> u8 {
        1
    }

    fn step(&self) -> u8 {
        STEP_THUMBNAILER
    }

    fn run(&self, core: &Core, task: &mut Task) -> Status {
        let Some(media_id) = task.media_id else {
            log::error!("Thumbnailer reached task {} without a media", task.id);
            return Status::Fatal;
        };
        let media_row = match core.db.with_conn(|conn| media::get(conn, media_id)) {
            Ok(Some(m)) => m,
            Ok(None) => return Status::Fatal,
            Err(e) => {
                log::error!("Failed to load media {}: {}", media_id, e);
                return Status::Error;
            }
        };
        log::info!("Generating {} thumbnail...", task.mrl);

        if task.probe.is_none() {
            let Ok(path) = mrl::to_path(&task.mrl) else {
                return Status::Fatal;
            };
            match probe::probe(&path) {
                Ok(p) => task.probe = Some(p),
                Err(e) => {
                    log::warn!("Failed to re-probe {}: {}", task.mrl, e);
                    return Status::Error;
                }
            }
        }
        let (has_video, has_artwork, duration_ms, dimensions) = match task.probe.as_ref() {
            Some(p) => (
                p.has_video(),
                p.has_artwork_only_video,
                p.duration_ms,
                p.video_streams.first().and_then(|s| match (s.width, s.height) {
                    (Some(w), Some(h)) if w > 0 && h > 0 => Some((w as u32, h as u32)),
                    _ => None,
                }),
            ),
            None => return Status::Fatal,
        };

        // Audio media: keep embedded artwork, never decode frames
        if media_row.media_type == MediaType::Audio {
            return self.finish_audio(core, task, media_id, has_artwork);
        }

        // A previous fallback pass already produced a thumbnail for a media
        // the preparse could not type: promote it to Video and move on, the
        // metadata pass reruns from there.
        if media_row.media_type == MediaType::Unknown
            && media_row.thumbnail.as_deref().is_some_and(|t| !t.is_empty())
        {
            return self.save_completion(core, task, media_id, Some(MediaType::Video), None);
        }

        // No video stream surfaced: an Unknown media is actually audio
        if !has_video {
            if media_row.media_type == MediaType::Unknown {
                log::info!(
                    "{} type has changed to Audio. Skipping thumbnail generation",
                    task.mrl
                );
                return self.finish_audio_reclassified(core, task, media_id, has_artwork);
            }
            return Status::Fatal;
        }

        let Ok(source) = mrl::to_path(&task.mrl) else {
            return Status::Fatal;
        };
        let output = self.thumbnail_path(core, media_id);

        match thumbnail::generate_video_thumbnail(&source, &output, duration_ms, dimensions) {
            Ok(()) => {}
            Err(MediaLibError::DecoderTimeout(e)) => {
                log::warn!("Timed out while computing {} snapshot: {}", task.mrl, e);
                return Status::Fatal;
            }
            Err(MediaLibError::DecoderStart(e)) => {
                log::warn!("Failed to start decoder for {}: {}", task.mrl, e);
                return Status::Error;
            }
            Err(e) => {
                log::warn!("Failed to generate {} thumbnail: {}", task.mrl, e);
                return Status::Fatal;
            }
        }

        // The file or media may have been deleted while playback ran
        let still_there = task
            .file_id
            .and_then(|id| file::fetch(core, id).ok().flatten());
        if still_there.is_none() {
            let _ = std::fs::remove_file(&output);
            return Status::Fatal;
        }

        log::info!("Done generating {} thumbnail", task.mrl);
        self.save_completion(
            core,
            task,
            media_id,
            None,
            Some(output.to_string_lossy().into_owned()),
        )
    }
}

impl Thumbnailer {
    fn thumbnail_path(&self, core: &Core, media_id: i64) -> PathBuf {
        core.thumbnail_dir
            .join(format!("{media_id}.{THUMBNAIL_EXTENSION}"))
    }

    /// Persist, in one transaction, the media mutations and the step.
    fn save_completion(
        &self,
        core: &Core,
        task: &mut Task,
        media_id: i64,
        new_type: Option<MediaType>,
        thumbnail: Option<String>,
    ) -> Status {
        let step_after = task.step | STEP_THUMBNAILER;
        let task_id = task.id;
        let res = db::with_retries(DB_BUSY_RETRIES, || {
            core.db.transaction(|conn| {
                if let Some(t) = new_type {
                    media::set_type(conn, media_id, t)?;
                }
                if let Some(thumb) = &thumbnail {
                    media::set_thumbnail(conn, media_id, thumb)?;
                }
                task::save_step(conn, task_id, step_after)?;
                Ok(())
            })
        });
        match res {
            Ok(()) => {
                task.mark_step_completed(STEP_THUMBNAILER);
                core.caches.media.evict(media_id);
                core.notifier
                    .notify(Entity::Media, Change::Modified, media_id);
                Status::Success
            }
            Err(e) => {
                log::error!("Failed to save thumbnail state for {}: {}", task.mrl, e);
                Status::Fatal
            }
        }
    }

    /// Audio media: extract the embedded artwork when there is one, then
    /// complete the step. The artwork also becomes the album (and, when it
    /// has none yet, the album artist) artwork.
    fn finish_audio(
        &self,
        core: &Core,
        task: &mut Task,
        media_id: i64,
        has_artwork: bool,
    ) -> Status {
        let mut thumbnail = None;
        if has_artwork {
            if let Ok(source) = mrl::to_path(&task.mrl) {
                let output = self.thumbnail_path(core, media_id);
                match thumbnail::extract_embedded_artwork(&source, &output) {
                    Ok(()) => thumbnail = Some(output.to_string_lossy().into_owned()),
                    Err(e) => {
                        log::warn!("Failed to extract {} artwork: {}", task.mrl, e);
                    }
                }
            }
        }
        if let Some(thumb) = &thumbnail {
            if let Err(e) = self.propagate_artwork(core, media_id, thumb) {
                log::warn!("Failed to propagate artwork for {}: {}", task.mrl, e);
            }
        }
        self.save_completion(core, task, media_id, None, thumbnail)
    }

    fn finish_audio_reclassified(
        &self,
        core: &Core,
        task: &mut Task,
        media_id: i64,
        has_artwork: bool,
    ) -> Status {
        let status = self.finish_audio(core, task, media_id, has_artwork);
        if status == Status::Success {
            let res = core
                .db
                .with_conn(|conn| media::set_type(conn, media_id, MediaType::Audio));
            if let Err(e) = res {
                log::error!("Failed to reclassify media {}: {}", media_id, e);
                return Status::Fatal;
            }
            core.caches.media.evict(media_id);
        }
        status
    }

    fn propagate_artwork(
        &self,
        core: &Core,
        media_id: i64,
        artwork: &str,
    ) -> crate::error::Result<()> {
        core.db.transaction(|conn| {
            let Some(rel) = album_track::from_media(conn, media_id)? else {
                return Ok(());
            };
            let Some(album_row) = album::get(conn, rel.album_id)? else {
                return Ok(());
            };
            if album_row.artwork_mrl.as_deref() == Some(artwork) {
                return Ok(());
            }
            album::set_artwork_mrl(conn, album_row.id, artwork)?;
            if let Some(artist_id) = album_row.artist_id {
                if let Some(artist_row) = artist::get(conn, artist_id)? {
                    if artist_row.artwork_mrl.as_deref().unwrap_or("").is_empty() {
                        artist::set_artwork_mrl(conn, artist_id, artwork)?;
                    }
                }
            }
            Ok(())
        })
    }
}
