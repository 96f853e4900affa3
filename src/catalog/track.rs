// Audio and video codec tracks attached to a media, written by the metadata
// extractor and dropped with the media through FK cascade.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    pub id: i64,
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
    pub samplerate: Option<i64>,
    pub nb_channels: Option<i64>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub media_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTrack {
    pub id: i64,
    pub codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub media_id: i64,
}

pub(crate) fn add_audio_track(
    conn: &Connection,
    media_id: i64,
    codec: Option<&str>,
    bitrate: Option<i64>,
    samplerate: Option<i64>,
    nb_channels: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO audio_tracks (media_id, codec, bitrate, samplerate, nb_channels)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![media_id, codec, bitrate, samplerate, nb_channels],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn add_video_track(
    conn: &Connection,
    media_id: i64,
    codec: Option<&str>,
    width: Option<i64>,
    height: Option<i64>,
    fps: Option<f64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO video_tracks (media_id, codec, width, height, fps)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![media_id, codec, width, height, fps],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn audio_tracks_of(conn: &Connection, media_id: i64) -> Result<Vec<AudioTrack>> {
    let mut stmt = conn.prepare(
        "SELECT id, codec, bitrate, samplerate, nb_channels, language, description, media_id
         FROM audio_tracks WHERE media_id = ?1",
    )?;
    let tracks = stmt
        .query_map(params![media_id], map_audio)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tracks)
}

pub(crate) fn video_tracks_of(conn: &Connection, media_id: i64) -> Result<Vec<VideoTrack>> {
    let mut stmt = conn.prepare(
        "SELECT id, codec, width, height, fps, language, description, media_id
         FROM video_tracks WHERE media_id = ?1",
    )?;
    let tracks = stmt
        .query_map(params![media_id], map_video)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tracks)
}

/// Probing is re-run when a file changes; old codec rows go first.
pub(crate) fn clear_tracks_of(conn: &Connection, media_id: i64) -> Result<()> {
    conn.execute("DELETE FROM audio_tracks WHERE media_id = ?1", params![media_id])?;
    conn.execute("DELETE FROM video_tracks WHERE media_id = ?1", params![media_id])?;
    Ok(())
}

fn map_audio(row: &Row) -> rusqlite::Result<AudioTrack> {
    Ok(AudioTrack {
        id: row.get(0)?,
        codec: row.get(1)?,
        bitrate: row.get(2)?,
        samplerate: row.get(3)?,
        nb_channels: row.get(4)?,
        language: row.get(5)?,
        description: row.get(6)?,
        media_id: row.get(7)?,
    })
}

fn map_video(row: &Row) -> rusqlite::Result<VideoTrack> {
    Ok(VideoTrack {
        id: row.get(0)?,
        codec: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        fps: row.get(4)?,
        language: row.get(5)?,
        description: row.get(6)?,
        media_id: row.get(7)?,
    })
}
