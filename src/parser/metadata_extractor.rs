// First parser service: probe the file, materialize its File row and the
// Media it realizes, and stash the probe result for the analyzer.

use std::path::Path;

use crate::catalog::file::{self, FileType, NewFile};
use crate::catalog::media::{self, MediaType};
use crate::catalog::task::{self, Task, STEP_METADATA_EXTRACTION};
use crate::catalog::{folder, playlist, track};
use crate::constants::{is_playlist_extension, DB_BUSY_RETRIES};
use crate::core::Core;
use crate::db;
use crate::error::MediaLibError;
use crate::mrl;
use crate::notifier::{Change, Entity};
use crate::probe;

use super::service::{ParserService, Status};

pub(crate) struct MetadataExtractor;

impl ParserService for MetadataExtractor {
    fn name(&self) -> &'static str {
        "MetadataExtractor"
    }

    fn step(&self) -> u8 {
        STEP_METADATA_EXTRACTION
    }

    fn run(&self, core: &Core, task: &mut Task) -> Status {
        let Ok(path) = mrl::to_path(&task.mrl) else {
            log::error!("Unsupported MRL scheme for task {}: {}", task.id, task.mrl);
            return Status::Fatal;
        };
        // The entry may have vanished between discovery and parsing
        let Ok(fs_meta) = std::fs::metadata(&path) else {
            log::info!("{} vanished before parsing, discarding task", task.mrl);
            return Status::Discarded;
        };
        let mtime = fs_meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let size = fs_meta.len() as i64;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        if is_playlist_extension(&extension) {
            return self.extract_playlist_file(core, task, &path, mtime, size);
        }

        let probed = match probe::probe(&path) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Failed to probe {}: {}", task.mrl, e);
                return Status::Error;
            }
        };

        let media_type = if probed.has_video() {
            MediaType::Video
        } else if probed.has_audio() {
            MediaType::Audio
        } else {
            MediaType::Unknown
        };
        let title = probed
            .tags
            .title
            .clone()
            .unwrap_or_else(|| mrl::decoded_file_name(&task.mrl));
        let filename = mrl::decoded_file_name(&task.mrl);
        let duration = probed.duration_ms.unwrap_or(-1);

        let task_id = task.id;
        let task_mrl = task.mrl.clone();
        let prev_file_id = task.file_id;
        let parent_folder_id = task.parent_folder_id;
        let probed_audio = probed.audio_streams.clone();
        let probed_video = probed.video_streams.clone();

        let created = db::with_retries(DB_BUSY_RETRIES, || {
            core.db.transaction(|conn| {
                let mut media_created = false;

                // Resolve (or reuse) the file row
                let (file_id, media_id) = match prev_file_id
                    .map(|id| file::get(conn, id))
                    .transpose()?
                    .flatten()
                {
                    Some(f) => (f.id, f.media_id),
                    None => {
                        let Some(folder_id) = parent_folder_id else {
                            return Err(MediaLibError::DbGeneric(format!(
                                "task {task_id} has neither file nor folder"
                            )));
                        };
                        let Some(parent) = folder::get(conn, folder_id)? else {
                            // Folder removed while the task was queued
                            return Ok(None);
                        };
                        let stored_mrl = if parent.is_removable {
                            mrl::file_name(&task_mrl)
                        } else {
                            task_mrl.clone()
                        };
                        match file::from_file_name(conn, &stored_mrl, folder_id)? {
                            Some(existing)
                                if existing.last_modification_date == mtime
                                    && existing.size == size =>
                            {
                                (existing.id, existing.media_id)
                            }
                            other => {
                                // A changed file restarts from a clean slate
                                if let Some(stale) = other {
                                    file::delete(conn, stale.id)?;
                                }
                                let id = file::create_detached(
                                    conn,
                                    &NewFile {
                                        mrl: &stored_mrl,
                                        file_type: FileType::Main,
                                        folder_id,
                                        last_modification_date: mtime,
                                        size,
                                        is_removable: parent.is_removable,
                                    },
                                )?;
                                task::set_file_id(conn, task_id, id)?;
                                (id, None)
                            }
                        }
                    }
                };

                let media_id = match media_id {
                    Some(id) => {
                        if duration > 0 {
                            media::set_duration(conn, id, duration)?;
                        }
                        id
                    }
                    None => {
                        let id = media::create(conn, media_type, &title, &filename)?;
                        if duration > 0 {
                            media::set_duration(conn, id, duration)?;
                        }
                        file::set_media_id(conn, file_id, id)?;
                        media_created = true;
                        id
                    }
                };

                // Refresh the codec rows
                track::clear_tracks_of(conn, media_id)?;
                for stream in &probed_audio {
                    track::add_audio_track(
                        conn,
                        media_id,
                        stream.codec.as_deref(),
                        stream.bitrate,
                        stream.samplerate,
                        stream.channels,
                    )?;
                }
                for stream in &probed_video {
                    track::add_video_track(
                        conn,
                        media_id,
                        stream.codec.as_deref(),
                        stream.width,
                        stream.height,
                        stream.fps,
                    )?;
                }

                task::save_step(conn, task_id, STEP_METADATA_EXTRACTION)?;
                Ok(Some((file_id, media_id, media_created)))
            })
        });

        match created {
            Ok(Some((file_id, media_id, media_created))) => {
                task.file_id = Some(file_id);
                task.media_id = Some(media_id);
                task.mark_step_completed(STEP_METADATA_EXTRACTION);
                task.probe = Some(probed);
                if media_created {
                    core.notifier.notify(Entity::Media, Change::Added, media_id);
                } else {
                    core.caches.media.evict(media_id);
                    core.notifier
                        .notify(Entity::Media, Change::Modified, media_id);
                }
                Status::Success
            }
            Ok(None) => Status::Discarded,
            Err(e) => {
                log::error!("Failed to persist metadata for {}: {}", task.mrl, e);
                Status::Error
            }
        }
    }
}

impl MetadataExtractor {
    /// Playlist files get a Playlist row instead of a Media; its entries are
    /// expanded by the analyzer.
    fn extract_playlist_file(
        &self,
        core: &Core,
        task: &mut Task,
        path: &Path,
        mtime: i64,
        size: i64,
    ) -> Status {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("playlist")
            .to_string();
        let task_id = task.id;
        let task_mrl = task.mrl.clone();
        let prev_file_id = task.file_id;
        let parent_folder_id = task.parent_folder_id;

        let created = db::with_retries(DB_BUSY_RETRIES, || {
            core.db.transaction(|conn| {
                if let Some(existing) = prev_file_id.map(|id| file::get(conn, id)).transpose()?.flatten()
                {
                    task::save_step(conn, task_id, STEP_METADATA_EXTRACTION)?;
                    return Ok(Some((existing.id, existing.playlist_id, false)));
                }
                let Some(folder_id) = parent_folder_id else {
                    return Err(MediaLibError::DbGeneric(format!(
                        "playlist task {task_id} has no parent folder"
                    )));
                };
                let Some(parent) = folder::get(conn, folder_id)? else {
                    return Ok(None);
                };
                let stored_mrl = if parent.is_removable {
                    mrl::file_name(&task_mrl)
                } else {
                    task_mrl.clone()
                };
                if let Some(existing) = file::from_file_name(conn, &stored_mrl, folder_id)? {
                    task::set_file_id(conn, task_id, existing.id)?;
                    task::save_step(conn, task_id, STEP_METADATA_EXTRACTION)?;
                    return Ok(Some((existing.id, existing.playlist_id, false)));
                }
                let playlist_id = playlist::create(conn, &name, None)?;
                let file_id = file::create_from_playlist(
                    conn,
                    playlist_id,
                    &NewFile {
                        mrl: &stored_mrl,
                        file_type: FileType::Playlist,
                        folder_id,
                        last_modification_date: mtime,
                        size,
                        is_removable: parent.is_removable,
                    },
                )?;
                conn.execute(
                    "UPDATE playlists SET file_id = ?1 WHERE id = ?2",
                    rusqlite::params![file_id, playlist_id],
                )?;
                task::set_file_id(conn, task_id, file_id)?;
                task::save_step(conn, task_id, STEP_METADATA_EXTRACTION)?;
                Ok(Some((file_id, Some(playlist_id), true)))
            })
        });

        match created {
            Ok(Some((file_id, playlist_id, playlist_created))) => {
                task.file_id = Some(file_id);
                task.mark_step_completed(STEP_METADATA_EXTRACTION);
                if let (true, Some(playlist_id)) = (playlist_created, playlist_id) {
                    core.notifier
                        .notify(Entity::Playlist, Change::Added, playlist_id);
                }
                Status::Success
            }
            Ok(None) => Status::Discarded,
            Err(e) => {
                log::error!("Failed to persist playlist file {}: {}", task.mrl, e);
                Status::Error
            }
        }
    }
}
