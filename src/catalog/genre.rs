// Genre rows.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

const SELECT: &str = "SELECT id, name FROM genres";

fn map_genre(row: &Row) -> rusqlite::Result<Genre> {
    Ok(Genre {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Genre>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_genre)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Genre>>> {
    core.caches
        .genre
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

pub(crate) fn by_name(conn: &Connection, name: &str) -> Result<Option<Genre>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE name = ?1"), params![name], map_genre)
        .optional()?;
    Ok(result)
}

pub(crate) fn get_or_create(conn: &Connection, name: &str) -> Result<Genre> {
    if let Some(genre) = by_name(conn, name)? {
        return Ok(genre);
    }
    match conn.execute("INSERT INTO genres (name) VALUES (?1)", params![name]) {
        Ok(_) => Ok(Genre {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        }),
        Err(e) => {
            let err: crate::error::MediaLibError = e.into();
            if err.is_constraint() {
                by_name(conn, name)?.ok_or(err)
            } else {
                Err(err)
            }
        }
    }
}

pub(crate) fn list_all(conn: &Connection, desc: bool) -> Result<Vec<Genre>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} ORDER BY name {}",
        if desc { "DESC" } else { "ASC" }
    ))?;
    let genres = stmt
        .query_map([], map_genre)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(genres)
}

pub(crate) fn search(conn: &Connection, pattern: &str) -> Result<Vec<Genre>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE id IN (SELECT rowid FROM genre_fts WHERE name MATCH ?1)"
    ))?;
    let genres = stmt
        .query_map(params![format!("{pattern}*")], map_genre)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(genres)
}
