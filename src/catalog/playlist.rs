// Playlist rows and their ordered media relation. Position bookkeeping on
// append and removal is trigger-maintained; insertion at an arbitrary
// position shifts the tail here.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::media::{self, Media};
use crate::catalog::timestamp_now;
use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub file_id: Option<i64>,
    pub creation_date: i64,
}

const SELECT: &str = "SELECT id, name, file_id, creation_date FROM playlists";

fn map_playlist(row: &Row) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get(0)?,
        name: row.get(1)?,
        file_id: row.get(2)?,
        creation_date: row.get(3)?,
    })
}

pub(crate) fn create(conn: &Connection, name: &str, file_id: Option<i64>) -> Result<i64> {
    conn.execute(
        "INSERT INTO playlists (name, file_id, creation_date) VALUES (?1, ?2, ?3)",
        params![name, file_id, timestamp_now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Playlist>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_playlist)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Playlist>>> {
    core.caches
        .playlist
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

pub(crate) fn list_all(conn: &Connection, desc: bool) -> Result<Vec<Playlist>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} ORDER BY name {}",
        if desc { "DESC" } else { "ASC" }
    ))?;
    let playlists = stmt
        .query_map([], map_playlist)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(playlists)
}

pub(crate) fn search(conn: &Connection, pattern: &str) -> Result<Vec<Playlist>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE id IN (SELECT rowid FROM playlist_fts WHERE name MATCH ?1)"
    ))?;
    let playlists = stmt
        .query_map(params![format!("{pattern}*")], map_playlist)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(playlists)
}

pub(crate) fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM playlists WHERE id = ?1", params![id])?;
    Ok(())
}

pub(crate) fn set_name(conn: &Connection, id: i64, name: &str) -> Result<()> {
    conn.execute(
        "UPDATE playlists SET name = ?1 WHERE id = ?2",
        params![name, id],
    )?;
    Ok(())
}

/// Append at the end; the playlist trigger assigns the position.
pub(crate) fn append(conn: &Connection, playlist_id: i64, media_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO playlist_media (playlist_id, media_id, position) VALUES (?1, ?2, NULL)",
        params![playlist_id, media_id],
    )?;
    Ok(())
}

/// Insert at a position, shifting the tail down.
pub(crate) fn add_at(
    conn: &Connection,
    playlist_id: i64,
    media_id: i64,
    position: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE playlist_media SET position = position + 1
         WHERE playlist_id = ?1 AND position >= ?2",
        params![playlist_id, position],
    )?;
    conn.execute(
        "INSERT INTO playlist_media (playlist_id, media_id, position) VALUES (?1, ?2, ?3)",
        params![playlist_id, media_id, position],
    )?;
    Ok(())
}

pub(crate) fn remove_media(conn: &Connection, playlist_id: i64, media_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM playlist_media WHERE playlist_id = ?1 AND media_id = ?2",
        params![playlist_id, media_id],
    )?;
    Ok(())
}

pub(crate) fn move_media(
    conn: &Connection,
    playlist_id: i64,
    media_id: i64,
    position: i64,
) -> Result<()> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT position FROM playlist_media WHERE playlist_id = ?1 AND media_id = ?2",
            params![playlist_id, media_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Ok(());
    };
    if current == position {
        return Ok(());
    }
    if current < position {
        conn.execute(
            "UPDATE playlist_media SET position = position - 1
             WHERE playlist_id = ?1 AND position > ?2 AND position <= ?3",
            params![playlist_id, current, position],
        )?;
    } else {
        conn.execute(
            "UPDATE playlist_media SET position = position + 1
             WHERE playlist_id = ?1 AND position >= ?3 AND position < ?2",
            params![playlist_id, current, position],
        )?;
    }
    conn.execute(
        "UPDATE playlist_media SET position = ?3 WHERE playlist_id = ?1 AND media_id = ?2",
        params![playlist_id, media_id, position],
    )?;
    Ok(())
}

/// Members, in playlist order.
pub(crate) fn media_of(conn: &Connection, playlist_id: i64) -> Result<Vec<Media>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.type, m.sub_type, m.duration, m.play_count, m.last_played_date,
                m.insertion_date, m.release_date, m.thumbnail, m.title, m.filename,
                m.is_favorite, m.is_present
         FROM media m
         JOIN playlist_media pm ON pm.media_id = m.id
         WHERE pm.playlist_id = ?1
         ORDER BY pm.position",
    )?;
    let rows = stmt
        .query_map(params![playlist_id], media::map_media)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
