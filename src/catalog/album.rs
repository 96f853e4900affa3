// Album rows. nb_tracks, duration and is_present are maintained by the
// album_tracks triggers; an album with no tracks left is deleted by them.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::SortingCriteria;
use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub title: Option<String>,
    pub artist_id: Option<i64>,
    pub release_year: Option<i64>,
    pub short_summary: Option<String>,
    pub artwork_mrl: Option<String>,
    pub nb_tracks: i64,
    pub duration: i64,
    pub is_present: bool,
}

const SELECT: &str = "SELECT id, title, artist_id, release_year, short_summary, artwork_mrl, \
                      nb_tracks, duration, is_present FROM albums";

fn map_album(row: &Row) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        title: row.get(1)?,
        artist_id: row.get(2)?,
        release_year: row.get(3)?,
        short_summary: row.get(4)?,
        artwork_mrl: row.get(5)?,
        nb_tracks: row.get(6)?,
        duration: row.get(7)?,
        is_present: row.get(8)?,
    })
}

pub(crate) fn create(conn: &Connection, title: &str, artwork_mrl: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO albums (title, artwork_mrl) VALUES (?1, ?2)",
        params![title, artwork_mrl],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Album>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_album)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Album>>> {
    core.caches
        .album
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

/// Candidate albums for the analyzer: same title, matching album artist.
pub(crate) fn by_title_and_artist(
    conn: &Connection,
    title: &str,
    artist_id: i64,
) -> Result<Option<Album>> {
    let result = conn
        .query_row(
            &format!("{SELECT} WHERE title = ?1 AND (artist_id = ?2 OR artist_id IS NULL)"),
            params![title, artist_id],
            map_album,
        )
        .optional()?;
    Ok(result)
}

fn order_by(sort: SortingCriteria, desc: bool) -> String {
    let column = match sort {
        SortingCriteria::Duration => "duration",
        SortingCriteria::ReleaseDate => "release_year",
        _ => "title",
    };
    format!("ORDER BY {} {}", column, if desc { "DESC" } else { "ASC" })
}

pub(crate) fn list_all(conn: &Connection, sort: SortingCriteria, desc: bool) -> Result<Vec<Album>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE is_present = 1 {}",
        order_by(sort, desc)
    ))?;
    let albums = stmt
        .query_map([], map_album)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(albums)
}

pub(crate) fn by_artist(conn: &Connection, artist_id: i64) -> Result<Vec<Album>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE artist_id = ?1 AND is_present = 1 ORDER BY release_year, title"
    ))?;
    let albums = stmt
        .query_map(params![artist_id], map_album)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(albums)
}

pub(crate) fn search(conn: &Connection, pattern: &str) -> Result<Vec<Album>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE id IN (SELECT rowid FROM album_fts WHERE title MATCH ?1)
         AND is_present = 1"
    ))?;
    let albums = stmt
        .query_map(params![format!("{pattern}*")], map_album)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(albums)
}

/// Reassign the album artist, keeping both artists' nb_albums counters in
/// step (the delete trigger only sees the final owner).
pub(crate) fn set_album_artist(conn: &Connection, id: i64, artist_id: i64) -> Result<()> {
    let previous: Option<i64> = conn
        .query_row(
            "SELECT artist_id FROM albums WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    if previous == Some(artist_id) {
        return Ok(());
    }
    conn.execute(
        "UPDATE albums SET artist_id = ?1 WHERE id = ?2",
        params![artist_id, id],
    )?;
    if let Some(previous) = previous {
        conn.execute(
            "UPDATE artists SET nb_albums = nb_albums - 1 WHERE id = ?1",
            params![previous],
        )?;
    }
    conn.execute(
        "UPDATE artists SET nb_albums = nb_albums + 1 WHERE id = ?1",
        params![artist_id],
    )?;
    Ok(())
}

pub(crate) fn set_release_year(conn: &Connection, id: i64, year: i64) -> Result<()> {
    // Conflicting years across tracks of one album void the field
    conn.execute(
        "UPDATE albums SET release_year = CASE
            WHEN release_year IS NULL THEN ?1
            WHEN release_year = ?1 THEN release_year
            ELSE 0 END
         WHERE id = ?2",
        params![year, id],
    )?;
    Ok(())
}

pub(crate) fn set_artwork_mrl(conn: &Connection, id: i64, artwork_mrl: &str) -> Result<()> {
    conn.execute(
        "UPDATE albums SET artwork_mrl = ?1 WHERE id = ?2",
        params![artwork_mrl, id],
    )?;
    Ok(())
}
