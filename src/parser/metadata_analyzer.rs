// Second parser service: turn probed tags into the musical model (genre,
// artists, album, album track) and expand playlist files into child tasks.

use std::path::Path;

use crate::catalog::file::{self, FileType};
use crate::catalog::media::{self, MediaSubType, MediaType};
use crate::catalog::task::{self, Task, STEP_COMPLETED, STEP_METADATA_ANALYSIS};
use crate::catalog::{album, album_track, artist, genre, playlist};
use crate::constants::{DB_BUSY_RETRIES, UNKNOWN_ARTIST_ID, VARIOUS_ARTISTS_ID};
use crate::core::Core;
use crate::db;
use crate::mrl;
use crate::notifier::{Change, Entity};
use crate::probe::{self, ProbedTags};

use super::service::{ParserService, Status};

pub(crate) struct MetadataAnalyzer;

impl ParserService for MetadataAnalyzer {
    fn name(&self) -> &'static str {
        "MetadataAnalyzer"
    }

    fn step(&self) -> u8 {
        STEP_METADATA_ANALYSIS
    }

    fn run(&self, core: &Core, task: &mut Task) -> Status {
        let Some(file_id) = task.file_id else {
            log::error!("Analyzer reached task {} without a file", task.id);
            return Status::Fatal;
        };
        let file_row = match file::fetch(core, file_id) {
            Ok(Some(f)) => f,
            Ok(None) => return Status::Discarded,
            Err(e) => {
                log::error!("Failed to load file {}: {}", file_id, e);
                return Status::Error;
            }
        };

        if file_row.file_type == FileType::Playlist {
            return self.parse_playlist(core, task, file_row.playlist_id);
        }
        self.analyze_media(core, task)
    }
}

impl MetadataAnalyzer {
    fn analyze_media(&self, core: &Core, task: &mut Task) -> Status {
        // Recovered tasks come back without their transient probe
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
        let Some(probed) = task.probe.as_ref() else {
            return Status::Fatal;
        };
        let Some(media_id) = task.media_id else {
            log::error!("Analyzer reached task {} without a media", task.id);
            return Status::Fatal;
        };

        let is_audio = !probed.has_video() && probed.has_audio();
        let tags = probed.tags.clone();
        let duration = probed.duration_ms.unwrap_or(0);
        let task_id = task.id;

        if !is_audio || tags.album.is_none() && tags.artist.is_none() {
            // Nothing musical to derive; the step still completes
            let res = core
                .db
                .with_conn(|conn| task::save_step(conn, task_id, task.step | STEP_METADATA_ANALYSIS));
            if let Err(e) = res {
                log::error!("Failed to save analyzer step for {}: {}", task.mrl, e);
                return Status::Error;
            }
            task.mark_step_completed(STEP_METADATA_ANALYSIS);
            return Status::Success;
        }

        let step_after = task.step | STEP_METADATA_ANALYSIS;
        let outcome = db::with_retries(DB_BUSY_RETRIES, || {
            core.db
                .transaction(|conn| link_album_track(conn, media_id, &tags, duration, step_after, task_id))
        });

        match outcome {
            Ok(notifications) => {
                task.mark_step_completed(STEP_METADATA_ANALYSIS);
                for (entity, change, id) in notifications {
                    core.notifier.notify(entity, change, id);
                }
                core.caches.media.evict(media_id);
                Status::Success
            }
            Err(e) => {
                log::error!("Failed to analyze {}: {}", task.mrl, e);
                Status::Error
            }
        }
    }

    /// Expand a playlist file: each local entry becomes a child task tagged
    /// with its position, each remote entry an external media appended
    /// directly.
    fn parse_playlist(&self, core: &Core, task: &mut Task, playlist_id: Option<i64>) -> Status {
        let Some(playlist_id) = playlist_id else {
            return Status::Fatal;
        };
        let Ok(path) = mrl::to_path(&task.mrl) else {
            return Status::Fatal;
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to read playlist {}: {}", task.mrl, e);
                return Status::Discarded;
            }
        };

        let entries = parse_m3u(&content);
        let dir = path.parent().unwrap_or(Path::new("/"));
        let task_id = task.id;
        let parent_folder_id = task.parent_folder_id;

        let children = core.db.transaction(|conn| {
            let mut children = Vec::new();
            for (index, entry) in entries.iter().enumerate() {
                match entry {
                    M3uEntry::Remote(url) => {
                        let title = mrl::decoded_file_name(url);
                        let media_id =
                            media::create(conn, MediaType::Stream, &title, &title)?;
                        if file::create_external(conn, media_id, FileType::Main, url)?.is_none() {
                            // Already known; point the playlist at the
                            // existing media instead
                            if let Some(existing) = file::from_external_mrl(conn, url)? {
                                media::delete(conn, media_id)?;
                                if let Some(known_media) = existing.media_id {
                                    playlist::add_at(conn, playlist_id, known_media, index as i64)?;
                                }
                                continue;
                            }
                        }
                        playlist::add_at(conn, playlist_id, media_id, index as i64)?;
                    }
                    M3uEntry::Local(rel) => {
                        let target = if Path::new(rel).is_absolute() {
                            Path::new(rel).to_path_buf()
                        } else {
                            dir.join(rel)
                        };
                        let child_mrl = mrl::from_path(&target);
                        let Some(folder_id) = parent_folder_id else { continue };
                        match task::create(
                            conn,
                            &child_mrl,
                            folder_id,
                            Some((playlist_id, index as i64)),
                        ) {
                            Ok(child) => children.push(child),
                            Err(e) if e.is_constraint() => {
                                log::warn!(
                                    "Playlist entry {} already scheduled, skipping",
                                    child_mrl
                                );
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
            task::save_step(conn, task_id, STEP_COMPLETED)?;
            Ok(children)
        });

        match children {
            Ok(children) => {
                // A playlist file needs no thumbnail pass; the task completes here
                task.mark_step_completed(STEP_COMPLETED);
                task.children = children;
                core.notifier
                    .notify(Entity::Playlist, Change::Modified, playlist_id);
                Status::Success
            }
            Err(e) => {
                log::error!("Failed to expand playlist {}: {}", task.mrl, e);
                Status::Error
            }
        }
    }
}

type Notification = (Entity, Change, i64);

/// Resolve genre/artists/album and create the album track, inside the
/// caller's transaction.
fn link_album_track(
    conn: &rusqlite::Connection,
    media_id: i64,
    tags: &ProbedTags,
    duration: i64,
    step_after: u8,
    task_id: i64,
) -> crate::error::Result<Vec<Notification>> {
    let mut notifications = Vec::new();

    // A recovered or retried task may have been analyzed already
    if album_track::from_media(conn, media_id)?.is_some() {
        task::save_step(conn, task_id, step_after)?;
        return Ok(notifications);
    }

    let genre_row = match &tags.genre {
        Some(name) => Some(genre::get_or_create(conn, name)?),
        None => None,
    };

    let track_artist_id = match &tags.artist {
        Some(name) => {
            let row = artist::get_or_create(conn, name)?;
            if row.nb_tracks == 0 {
                notifications.push((Entity::Artist, Change::Added, row.id));
            }
            row.id
        }
        None => UNKNOWN_ARTIST_ID,
    };
    let album_artist_id = match &tags.album_artist {
        Some(name) => {
            let row = artist::get_or_create(conn, name)?;
            if row.nb_tracks == 0 && row.id != track_artist_id {
                notifications.push((Entity::Artist, Change::Added, row.id));
            }
            row.id
        }
        None => track_artist_id,
    };

    let album_title = tags.album.as_deref().unwrap_or("");
    let album_row = if album_title.is_empty() {
        None
    } else {
        album::by_title_and_artist(conn, album_title, album_artist_id)?
    };
    let album_id = match album_row {
        Some(existing) => {
            match existing.artist_id {
                None => album::set_album_artist(conn, existing.id, album_artist_id)?,
                Some(current)
                    if current != album_artist_id && current != VARIOUS_ARTISTS_ID =>
                {
                    // Conflicting album artists collapse to Various Artists
                    album::set_album_artist(conn, existing.id, VARIOUS_ARTISTS_ID)?;
                }
                _ => {}
            }
            notifications.push((Entity::Album, Change::Modified, existing.id));
            existing.id
        }
        None if !album_title.is_empty() => {
            let id = album::create(conn, album_title, None)?;
            album::set_album_artist(conn, id, album_artist_id)?;
            notifications.push((Entity::Album, Change::Added, id));
            id
        }
        None => {
            // No album tag: the track still completes analysis without a
            // musical home
            task::save_step(conn, task_id, step_after)?;
            return Ok(notifications);
        }
    };

    let track_id = album_track::create(
        conn,
        media_id,
        album_id,
        track_artist_id,
        genre_row.as_ref().map(|g| g.id),
        tags.track_number,
        tags.disc_number,
        duration,
    )?;
    notifications.push((Entity::AlbumTrack, Change::Added, track_id));

    media::set_sub_type(conn, media_id, MediaSubType::AlbumTrack)?;
    if let Some(title) = &tags.title {
        media::set_title(conn, media_id, title)?;
    }
    if let Some(year) = tags.date {
        media::set_release_date(conn, media_id, year)?;
        album::set_release_year(conn, album_id, year)?;
    }

    task::save_step(conn, task_id, step_after)?;
    Ok(notifications)
}

#[derive(Debug, PartialEq)]
enum M3uEntry {
    Local(String),
    Remote(String),
}

/// Minimal M3U/EXTM3U line format: comments start with '#', everything else
/// is an entry (absolute path, relative path or URL).
fn parse_m3u(content: &str) -> Vec<M3uEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match mrl::scheme(line) {
            Some("file") | None => M3uEntry::Local(
                line.strip_prefix("file://")
                    .map(mrl::decode)
                    .unwrap_or_else(|| line.to_string()),
            ),
            Some(_) => M3uEntry::Remote(line.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_m3u_skips_comments_and_blanks() {
        let content = "#EXTM3U\n\n#EXTINF:123,Artist - Title\nsongs/one.mp3\n/abs/two.flac\n";
        let entries = parse_m3u(content);
        assert_eq!(
            entries,
            vec![
                M3uEntry::Local("songs/one.mp3".into()),
                M3uEntry::Local("/abs/two.flac".into()),
            ]
        );
    }

    #[test]
    fn test_parse_m3u_classifies_remote_entries() {
        let entries = parse_m3u("http://radio.example/stream\nfile:///local/three.mp3\n");
        assert_eq!(
            entries,
            vec![
                M3uEntry::Remote("http://radio.example/stream".into()),
                M3uEntry::Local("/local/three.mp3".into()),
            ]
        );
    }
}
