// Movie rows, one of the alternate media sub-types.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::media::{self, MediaSubType};
use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    pub media_id: i64,
    pub title: String,
    pub summary: Option<String>,
    pub artwork_mrl: Option<String>,
    pub imdb_id: Option<String>,
}

const SELECT: &str = "SELECT id, media_id, title, summary, artwork_mrl, imdb_id FROM movies";

fn map_movie(row: &Row) -> rusqlite::Result<Movie> {
    Ok(Movie {
        id: row.get(0)?,
        media_id: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        artwork_mrl: row.get(4)?,
        imdb_id: row.get(5)?,
    })
}

pub(crate) fn create(conn: &Connection, media_id: i64, title: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO movies (media_id, title) VALUES (?1, ?2)",
        params![media_id, title],
    )?;
    let id = conn.last_insert_rowid();
    media::set_sub_type(conn, media_id, MediaSubType::Movie)?;
    Ok(id)
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Movie>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_movie)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Movie>>> {
    core.caches
        .movie
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

pub(crate) fn by_title(conn: &Connection, title: &str) -> Result<Option<Movie>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE title = ?1"), params![title], map_movie)
        .optional()?;
    Ok(result)
}

pub(crate) fn from_media(conn: &Connection, media_id: i64) -> Result<Option<Movie>> {
    let result = conn
        .query_row(
            &format!("{SELECT} WHERE media_id = ?1"),
            params![media_id],
            map_movie,
        )
        .optional()?;
    Ok(result)
}
