// Artist rows. Ids 1 and 2 are the seeded "Unknown Artist" and "Various
// Artists"; the counter triggers never delete them.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::SortingCriteria;
use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artist {
    pub id: i64,
    pub name: Option<String>,
    pub shortbio: Option<String>,
    pub artwork_mrl: Option<String>,
    pub nb_albums: i64,
    pub nb_tracks: i64,
    pub is_present: bool,
}

const SELECT: &str = "SELECT id, name, shortbio, artwork_mrl, nb_albums, nb_tracks, \
                      is_present FROM artists";

fn map_artist(row: &Row) -> rusqlite::Result<Artist> {
    Ok(Artist {
        id: row.get(0)?,
        name: row.get(1)?,
        shortbio: row.get(2)?,
        artwork_mrl: row.get(3)?,
        nb_albums: row.get(4)?,
        nb_tracks: row.get(5)?,
        is_present: row.get(6)?,
    })
}

/// Plain insert; surfaces DbConstraint on a duplicate name so the caller can
/// recover by fetching the existing row.
pub(crate) fn create(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT INTO artists (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Artist>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_artist)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Artist>>> {
    core.caches
        .artist
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

pub(crate) fn by_name(conn: &Connection, name: &str) -> Result<Option<Artist>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE name = ?1"), params![name], map_artist)
        .optional()?;
    Ok(result)
}

/// Duplicate-tolerant creation: a constraint violation means another thread
/// (or an earlier scan) won the race, so fetch the winner.
pub(crate) fn get_or_create(conn: &Connection, name: &str) -> Result<Artist> {
    if let Some(artist) = by_name(conn, name)? {
        return Ok(artist);
    }
    match create(conn, name) {
        Ok(id) => Ok(Artist {
            id,
            name: Some(name.to_string()),
            shortbio: None,
            artwork_mrl: None,
            nb_albums: 0,
            nb_tracks: 0,
            is_present: true,
        }),
        Err(e) if e.is_constraint() => {
            log::warn!(
                "Constraint violation while creating artist '{}', fetching it instead",
                name
            );
            by_name(conn, name)?.ok_or(e)
        }
        Err(e) => Err(e),
    }
}

fn order_by(sort: SortingCriteria, desc: bool) -> String {
    // Artists carry no duration, date or play column; the counters stand in
    // for the non-alphabetical criteria.
    let column = match sort {
        SortingCriteria::Duration | SortingCriteria::PlayCount => "nb_tracks",
        SortingCriteria::InsertionDate | SortingCriteria::ReleaseDate => "nb_albums",
        SortingCriteria::Default | SortingCriteria::Alpha => "name",
    };
    format!("ORDER BY {} {}", column, if desc { "DESC" } else { "ASC" })
}

/// List artists; unless include_all is set, artists without an album of
/// their own (pure track credits and the defaults) are skipped.
pub(crate) fn list_all(
    conn: &Connection,
    include_all: bool,
    sort: SortingCriteria,
    desc: bool,
) -> Result<Vec<Artist>> {
    let filter = if include_all {
        "is_present = 1"
    } else {
        "is_present = 1 AND nb_albums > 0"
    };
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE id > 2 AND {filter} {}",
        order_by(sort, desc)
    ))?;
    let artists = stmt
        .query_map([], map_artist)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(artists)
}

pub(crate) fn search(conn: &Connection, pattern: &str) -> Result<Vec<Artist>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE id IN (SELECT rowid FROM artist_fts WHERE name MATCH ?1)
         AND is_present = 1"
    ))?;
    let artists = stmt
        .query_map(params![format!("{pattern}*")], map_artist)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(artists)
}

pub(crate) fn set_artwork_mrl(conn: &Connection, id: i64, artwork_mrl: &str) -> Result<()> {
    conn.execute(
        "UPDATE artists SET artwork_mrl = ?1 WHERE id = ?2",
        params![artwork_mrl, id],
    )?;
    Ok(())
}
