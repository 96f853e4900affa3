// AlbumTrack rows: the join between a media, its album, artist and genre.
// Insertion and deletion drive the album/artist counter triggers.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumTrack {
    pub id: i64,
    pub media_id: i64,
    pub duration: i64,
    pub artist_id: Option<i64>,
    pub genre_id: Option<i64>,
    pub track_number: Option<i64>,
    pub album_id: i64,
    pub disc_number: Option<i64>,
    pub is_present: bool,
}

const SELECT: &str = "SELECT id, media_id, duration, artist_id, genre_id, track_number, \
                      album_id, disc_number, is_present FROM album_tracks";

fn map_track(row: &Row) -> rusqlite::Result<AlbumTrack> {
    Ok(AlbumTrack {
        id: row.get(0)?,
        media_id: row.get(1)?,
        duration: row.get(2)?,
        artist_id: row.get(3)?,
        genre_id: row.get(4)?,
        track_number: row.get(5)?,
        album_id: row.get(6)?,
        disc_number: row.get(7)?,
        is_present: row.get(8)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn create(
    conn: &Connection,
    media_id: i64,
    album_id: i64,
    artist_id: i64,
    genre_id: Option<i64>,
    track_number: Option<i64>,
    disc_number: Option<i64>,
    duration: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO album_tracks (media_id, album_id, artist_id, genre_id, track_number,
                                   disc_number, duration)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            media_id,
            album_id,
            artist_id,
            genre_id,
            track_number,
            disc_number,
            duration.max(0),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<AlbumTrack>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_track)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<AlbumTrack>>> {
    core.caches
        .album_track
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

pub(crate) fn from_media(conn: &Connection, media_id: i64) -> Result<Option<AlbumTrack>> {
    let result = conn
        .query_row(
            &format!("{SELECT} WHERE media_id = ?1"),
            params![media_id],
            map_track,
        )
        .optional()?;
    Ok(result)
}

pub(crate) fn by_album(conn: &Connection, album_id: i64) -> Result<Vec<AlbumTrack>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE album_id = ?1 ORDER BY disc_number, track_number"
    ))?;
    let tracks = stmt
        .query_map(params![album_id], map_track)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tracks)
}

pub(crate) fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM album_tracks WHERE id = ?1", params![id])?;
    Ok(())
}
