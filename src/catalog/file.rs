// File rows: the concrete filesystem objects backing media and playlists.
//
// Internal files are unique per (mrl, folder); external ones (streams,
// host-added paths) have no folder and their uniqueness is enforced in code
// since a SQL UNIQUE constraint does not cover NULL groups.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::folder;
use crate::core::Core;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Unknown = 0,
    Main = 1,
    Part = 2,
    Soundtrack = 3,
    Subtitle = 4,
    Playlist = 5,
}

impl FileType {
    pub fn from_i64(value: i64) -> FileType {
        match value {
            1 => FileType::Main,
            2 => FileType::Part,
            3 => FileType::Soundtrack,
            4 => FileType::Subtitle,
            5 => FileType::Playlist,
            _ => FileType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: i64,
    pub media_id: Option<i64>,
    pub playlist_id: Option<i64>,
    pub mrl: String,
    pub file_type: FileType,
    pub last_modification_date: i64,
    pub size: i64,
    pub folder_id: Option<i64>,
    pub is_present: bool,
    pub is_removable: bool,
    pub is_external: bool,
}

const SELECT: &str = "SELECT id, media_id, playlist_id, mrl, type, last_modification_date, \
                      size, folder_id, is_present, is_removable, is_external FROM files";

fn map_file(row: &Row) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        media_id: row.get(1)?,
        playlist_id: row.get(2)?,
        mrl: row.get(3)?,
        file_type: FileType::from_i64(row.get(4)?),
        last_modification_date: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        size: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        folder_id: row.get(7)?,
        is_present: row.get(8)?,
        is_removable: row.get(9)?,
        is_external: row.get(10)?,
    })
}

pub(crate) struct NewFile<'a> {
    pub mrl: &'a str,
    pub file_type: FileType,
    pub folder_id: i64,
    pub last_modification_date: i64,
    pub size: i64,
    pub is_removable: bool,
}

pub(crate) fn create_from_media(conn: &Connection, media_id: i64, file: &NewFile) -> Result<i64> {
    conn.execute(
        "INSERT INTO files (media_id, mrl, type, folder_id, last_modification_date, size,
                            is_removable, is_external)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        params![
            media_id,
            file.mrl,
            file.file_type as i64,
            file.folder_id,
            file.last_modification_date,
            file.size,
            file.is_removable,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// File discovered but not yet tied to a media; the extractor links it once
/// the media row exists.
pub(crate) fn create_detached(conn: &Connection, file: &NewFile) -> Result<i64> {
    conn.execute(
        "INSERT INTO files (media_id, mrl, type, folder_id, last_modification_date, size,
                            is_removable, is_external)
         VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![
            file.mrl,
            file.file_type as i64,
            file.folder_id,
            file.last_modification_date,
            file.size,
            file.is_removable,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn create_from_playlist(
    conn: &Connection,
    playlist_id: i64,
    file: &NewFile,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO files (playlist_id, mrl, type, folder_id, last_modification_date, size,
                            is_removable, is_external)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        params![
            playlist_id,
            file.mrl,
            file.file_type as i64,
            file.folder_id,
            file.last_modification_date,
            file.size,
            file.is_removable,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// External files have no folder; enforce mrl uniqueness here.
pub(crate) fn create_external(
    conn: &Connection,
    media_id: i64,
    file_type: FileType,
    mrl: &str,
) -> Result<Option<i64>> {
    if from_external_mrl(conn, mrl)?.is_some() {
        return Ok(None);
    }
    conn.execute(
        "INSERT INTO files (media_id, mrl, type, folder_id, is_removable, is_external)
         VALUES (?1, ?2, ?3, NULL, 0, 1)",
        params![media_id, mrl, file_type as i64],
    )?;
    Ok(Some(conn.last_insert_rowid()))
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<File>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_file)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<File>>> {
    core.caches
        .file
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

/// Lookup by full MRL; only valid for files on non-removable devices.
pub(crate) fn from_mrl(conn: &Connection, mrl: &str) -> Result<Option<File>> {
    let result = conn
        .query_row(
            &format!("{SELECT} WHERE mrl = ?1 AND folder_id IS NOT NULL"),
            params![mrl],
            map_file,
        )
        .optional()?;
    Ok(result)
}

/// Lookup by (file name, folder); the removable-device path.
pub(crate) fn from_file_name(
    conn: &Connection,
    file_name: &str,
    folder_id: i64,
) -> Result<Option<File>> {
    let result = conn
        .query_row(
            &format!("{SELECT} WHERE mrl = ?1 AND folder_id = ?2"),
            params![file_name, folder_id],
            map_file,
        )
        .optional()?;
    Ok(result)
}

pub(crate) fn from_external_mrl(conn: &Connection, mrl: &str) -> Result<Option<File>> {
    let result = conn
        .query_row(
            &format!("{SELECT} WHERE mrl = ?1 AND folder_id IS NULL"),
            params![mrl],
            map_file,
        )
        .optional()?;
    Ok(result)
}

pub(crate) fn by_folder(conn: &Connection, folder_id: i64) -> Result<Vec<File>> {
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE folder_id = ?1"))?;
    let files = stmt
        .query_map(params![folder_id], map_file)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

pub(crate) fn of_media(conn: &Connection, media_id: i64) -> Result<Vec<File>> {
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE media_id = ?1"))?;
    let files = stmt
        .query_map(params![media_id], map_file)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

pub(crate) fn set_media_id(conn: &Connection, id: i64, media_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE files SET media_id = ?1 WHERE id = ?2",
        params![media_id, id],
    )?;
    Ok(())
}

pub(crate) fn set_present(conn: &Connection, id: i64, present: bool) -> Result<()> {
    conn.execute(
        "UPDATE files SET is_present = ?1 WHERE id = ?2",
        params![present, id],
    )?;
    Ok(())
}

pub(crate) fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
    Ok(())
}

/// Rebuild the full MRL, joining the owning folder for removable files.
pub(crate) fn full_mrl(core: &Core, file: &File) -> Result<String> {
    if !file.is_removable {
        return Ok(file.mrl.clone());
    }
    let folder = match file.folder_id {
        Some(folder_id) => folder::fetch(core, folder_id)?,
        None => None,
    };
    match folder {
        Some(f) => Ok(format!("{}{}", folder::full_mrl(core, &f)?, file.mrl)),
        None => Ok(file.mrl.clone()),
    }
}
