// Device rows: one per storage volume ever observed. Devices are created on
// first sight and never destroyed automatically; unplugging only flips
// is_present, which cascades down to folders, files and media via triggers.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub uuid: String,
    pub scheme: String,
    pub is_removable: bool,
    pub is_present: bool,
}

const SELECT: &str = "SELECT id, uuid, scheme, is_removable, is_present FROM devices";

fn map_device(row: &Row) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        uuid: row.get(1)?,
        scheme: row.get(2)?,
        is_removable: row.get(3)?,
        is_present: row.get(4)?,
    })
}

pub(crate) fn create(conn: &Connection, uuid: &str, scheme: &str, is_removable: bool) -> Result<i64> {
    conn.execute(
        "INSERT INTO devices (uuid, scheme, is_removable) VALUES (?1, ?2, ?3)",
        params![uuid, scheme, is_removable],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Device>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_device)
        .optional()?;
    Ok(result)
}

pub(crate) fn by_uuid(conn: &Connection, uuid: &str) -> Result<Option<Device>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE uuid = ?1"), params![uuid], map_device)
        .optional()?;
    Ok(result)
}

pub(crate) fn all(conn: &Connection) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare(SELECT)?;
    let devices = stmt
        .query_map([], map_device)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(devices)
}

pub(crate) fn set_present(conn: &Connection, id: i64, present: bool) -> Result<()> {
    conn.execute(
        "UPDATE devices SET is_present = ?1 WHERE id = ?2",
        params![present, id],
    )?;
    Ok(())
}

/// Fetch-or-create by uuid, used when a device is first observed.
pub(crate) fn get_or_create(
    conn: &Connection,
    uuid: &str,
    scheme: &str,
    is_removable: bool,
) -> Result<Device> {
    if let Some(device) = by_uuid(conn, uuid)? {
        return Ok(device);
    }
    let id = create(conn, uuid, scheme, is_removable)?;
    Ok(Device {
        id,
        uuid: uuid.to_string(),
        scheme: scheme.to_string(),
        is_removable,
        is_present: true,
    })
}
