// Media rows: the logical assets realized by one or more files.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::{timestamp_now, SortingCriteria};
use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Unknown = 0,
    Video = 1,
    Audio = 2,
    External = 3,
    Stream = 4,
}

impl MediaType {
    pub fn from_i64(value: i64) -> MediaType {
        match value {
            1 => MediaType::Video,
            2 => MediaType::Audio,
            3 => MediaType::External,
            4 => MediaType::Stream,
            _ => MediaType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaSubType {
    Unknown = 0,
    ShowEpisode = 1,
    Movie = 2,
    AlbumTrack = 3,
}

impl MediaSubType {
    pub fn from_i64(value: i64) -> MediaSubType {
        match value {
            1 => MediaSubType::ShowEpisode,
            2 => MediaSubType::Movie,
            3 => MediaSubType::AlbumTrack,
            _ => MediaSubType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    pub media_type: MediaType,
    pub sub_type: MediaSubType,
    pub duration: i64,
    pub play_count: i64,
    pub last_played_date: Option<i64>,
    pub insertion_date: i64,
    pub release_date: Option<i64>,
    pub thumbnail: Option<String>,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub is_favorite: bool,
    pub is_present: bool,
}

const SELECT: &str = "SELECT id, type, sub_type, duration, play_count, last_played_date, \
                      insertion_date, release_date, thumbnail, title, filename, is_favorite, \
                      is_present FROM media";

pub(crate) fn map_media(row: &Row) -> rusqlite::Result<Media> {
    Ok(Media {
        id: row.get(0)?,
        media_type: MediaType::from_i64(row.get(1)?),
        sub_type: MediaSubType::from_i64(row.get(2)?),
        duration: row.get(3)?,
        play_count: row.get(4)?,
        last_played_date: row.get(5)?,
        insertion_date: row.get(6)?,
        release_date: row.get(7)?,
        thumbnail: row.get(8)?,
        title: row.get(9)?,
        filename: row.get(10)?,
        is_favorite: row.get(11)?,
        is_present: row.get(12)?,
    })
}

pub(crate) fn create(
    conn: &Connection,
    media_type: MediaType,
    title: &str,
    filename: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO media (type, title, filename, insertion_date) VALUES (?1, ?2, ?3, ?4)",
        params![media_type as i64, title, filename, timestamp_now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Media>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_media)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Media>>> {
    core.caches
        .media
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

fn order_by(sort: SortingCriteria, desc: bool) -> String {
    let column = match sort {
        SortingCriteria::Duration => "duration",
        SortingCriteria::InsertionDate => "insertion_date",
        SortingCriteria::ReleaseDate => "release_date",
        SortingCriteria::PlayCount => "play_count",
        SortingCriteria::Default | SortingCriteria::Alpha => "title",
    };
    format!("ORDER BY {} {}", column, if desc { "DESC" } else { "ASC" })
}

pub(crate) fn list_by_type(
    conn: &Connection,
    media_type: MediaType,
    sort: SortingCriteria,
    desc: bool,
) -> Result<Vec<Media>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE type = ?1 AND is_present = 1 {}",
        order_by(sort, desc)
    ))?;
    let media = stmt
        .query_map(params![media_type as i64], map_media)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(media)
}

pub(crate) fn search(conn: &Connection, pattern: &str) -> Result<Vec<Media>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE id IN (SELECT rowid FROM media_fts WHERE title MATCH ?1)
         AND is_present = 1"
    ))?;
    let media = stmt
        .query_map(params![format!("{pattern}*")], map_media)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(media)
}

/// Media ordered by most recent playback.
pub(crate) fn fetch_history(conn: &Connection) -> Result<Vec<Media>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE play_count > 0 ORDER BY last_played_date DESC"
    ))?;
    let media = stmt
        .query_map([], map_media)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(media)
}

pub(crate) fn clear_history(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE media SET play_count = 0, last_played_date = NULL WHERE play_count > 0",
        [],
    )?;
    Ok(())
}

pub(crate) fn increase_play_count(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE media SET play_count = play_count + 1, last_played_date = ?1 WHERE id = ?2",
        params![timestamp_now(), id],
    )?;
    Ok(())
}

pub(crate) fn set_type(conn: &Connection, id: i64, media_type: MediaType) -> Result<()> {
    conn.execute(
        "UPDATE media SET type = ?1 WHERE id = ?2",
        params![media_type as i64, id],
    )?;
    Ok(())
}

pub(crate) fn set_sub_type(conn: &Connection, id: i64, sub_type: MediaSubType) -> Result<()> {
    conn.execute(
        "UPDATE media SET sub_type = ?1 WHERE id = ?2",
        params![sub_type as i64, id],
    )?;
    Ok(())
}

pub(crate) fn set_duration(conn: &Connection, id: i64, duration: i64) -> Result<()> {
    conn.execute(
        "UPDATE media SET duration = ?1 WHERE id = ?2",
        params![duration, id],
    )?;
    Ok(())
}

pub(crate) fn set_title(conn: &Connection, id: i64, title: &str) -> Result<()> {
    conn.execute(
        "UPDATE media SET title = ?1 WHERE id = ?2",
        params![title, id],
    )?;
    Ok(())
}

pub(crate) fn set_thumbnail(conn: &Connection, id: i64, thumbnail: &str) -> Result<()> {
    conn.execute(
        "UPDATE media SET thumbnail = ?1 WHERE id = ?2",
        params![thumbnail, id],
    )?;
    Ok(())
}

pub(crate) fn set_release_date(conn: &Connection, id: i64, date: i64) -> Result<()> {
    conn.execute(
        "UPDATE media SET release_date = ?1 WHERE id = ?2",
        params![date, id],
    )?;
    Ok(())
}

pub(crate) fn set_favorite(conn: &Connection, id: i64, favorite: bool) -> Result<()> {
    conn.execute(
        "UPDATE media SET is_favorite = ?1 WHERE id = ?2",
        params![favorite, id],
    )?;
    Ok(())
}

pub(crate) fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM media WHERE id = ?1", params![id])?;
    Ok(())
}
