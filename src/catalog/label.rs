// Label rows: free-form tags attached to media, many-to-many.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::media::{self, Media};
use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub name: String,
}

const SELECT: &str = "SELECT id, name FROM labels";

fn map_label(row: &Row) -> rusqlite::Result<Label> {
    Ok(Label {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

pub(crate) fn create(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT INTO labels (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Label>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_label)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Label>>> {
    core.caches
        .label
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

pub(crate) fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM labels WHERE id = ?1", params![id])?;
    Ok(())
}

pub(crate) fn attach(conn: &Connection, label_id: i64, media_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO media_labels (label_id, media_id) VALUES (?1, ?2)",
        params![label_id, media_id],
    )?;
    Ok(())
}

pub(crate) fn detach(conn: &Connection, label_id: i64, media_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM media_labels WHERE label_id = ?1 AND media_id = ?2",
        params![label_id, media_id],
    )?;
    Ok(())
}

pub(crate) fn of_media(conn: &Connection, media_id: i64) -> Result<Vec<Label>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.name FROM labels l
         JOIN media_labels ml ON ml.label_id = l.id
         WHERE ml.media_id = ?1 ORDER BY l.name",
    )?;
    let labels = stmt
        .query_map(params![media_id], map_label)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(labels)
}

pub(crate) fn media_of(conn: &Connection, label_id: i64) -> Result<Vec<Media>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.type, m.sub_type, m.duration, m.play_count, m.last_played_date,
                m.insertion_date, m.release_date, m.thumbnail, m.title, m.filename,
                m.is_favorite, m.is_present
         FROM media m
         JOIN media_labels ml ON ml.media_id = m.id
         WHERE ml.label_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![label_id], media::map_media)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
