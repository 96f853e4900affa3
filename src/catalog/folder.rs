// Folder rows.
//
// For a removable device the stored path is relative to the mountpoint
// (encoded, trailing slash); for anything else it is the full MRL. The
// mountpoint is joined back at read time, so remounting at a new point
// never breaks referential integrity.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::device;
use crate::core::Core;
use crate::error::{MediaLibError, Result};
use crate::mrl;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub path: String,
    pub parent_id: Option<i64>,
    pub is_blacklisted: bool,
    pub device_id: i64,
    pub is_present: bool,
    pub is_removable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannedType {
    Yes,
    No,
    Any,
}

const SELECT: &str = "SELECT id, path, parent_id, is_blacklisted, device_id, is_present, \
                      is_removable FROM folders";

fn map_folder(row: &Row) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        path: row.get(1)?,
        parent_id: row.get(2)?,
        is_blacklisted: row.get(3)?,
        device_id: row.get(4)?,
        is_present: row.get(5)?,
        is_removable: row.get(6)?,
    })
}

pub(crate) fn create(
    conn: &Connection,
    path: &str,
    parent_id: Option<i64>,
    device_id: i64,
    is_removable: bool,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO folders (path, parent_id, device_id, is_removable) VALUES (?1, ?2, ?3, ?4)",
        params![path, parent_id, device_id, is_removable],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Folder>> {
    let result = conn
        .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], map_folder)
        .optional()?;
    Ok(result)
}

pub(crate) fn fetch(core: &Core, id: i64) -> Result<Option<Arc<Folder>>> {
    core.caches
        .folder
        .fetch(id, || core.db.with_conn(|conn| get(conn, id)))
}

pub(crate) fn by_path(
    conn: &Connection,
    device_id: i64,
    path: &str,
    banned: BannedType,
) -> Result<Option<Folder>> {
    let filter = match banned {
        BannedType::Yes => " AND is_blacklisted = 1",
        BannedType::No => " AND is_blacklisted = 0",
        BannedType::Any => "",
    };
    let result = conn
        .query_row(
            &format!("{SELECT} WHERE device_id = ?1 AND path = ?2{filter}"),
            params![device_id, path],
            map_folder,
        )
        .optional()?;
    Ok(result)
}

pub(crate) fn children(conn: &Connection, parent_id: i64) -> Result<Vec<Folder>> {
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE parent_id = ?1"))?;
    let folders = stmt
        .query_map(params![parent_id], map_folder)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(folders)
}

/// Entry points are parentless, non-banned folders.
pub(crate) fn entry_points(conn: &Connection) -> Result<Vec<Folder>> {
    let mut stmt =
        conn.prepare(&format!("{SELECT} WHERE parent_id IS NULL AND is_blacklisted = 0"))?;
    let folders = stmt
        .query_map([], map_folder)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(folders)
}

pub(crate) fn set_blacklisted(conn: &Connection, id: i64, blacklisted: bool) -> Result<()> {
    conn.execute(
        "UPDATE folders SET is_blacklisted = ?1 WHERE id = ?2",
        params![blacklisted, id],
    )?;
    Ok(())
}

pub(crate) fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM folders WHERE id = ?1", params![id])?;
    Ok(())
}

/// The stored form of a directory MRL for a given device: relative to the
/// mountpoint when removable, the full MRL otherwise.
pub(crate) fn storable_path(
    dir_mrl: &str,
    mountpoint_mrl: &str,
    is_removable: bool,
) -> Result<String> {
    let dir = mrl::with_trailing_slash(dir_mrl);
    if !is_removable {
        return Ok(dir);
    }
    let mp = mrl::with_trailing_slash(mountpoint_mrl);
    dir.strip_prefix(&mp)
        .map(|rel| rel.to_string())
        .ok_or_else(|| {
            MediaLibError::UnknownDevice(format!("{dir} is not under mountpoint {mp}"))
        })
}

/// Rebuild the full MRL of a folder, joining the device's current
/// mountpoint for removable devices.
pub(crate) fn full_mrl(core: &Core, folder: &Folder) -> Result<String> {
    if !folder.is_removable {
        return Ok(folder.path.clone());
    }
    let device = core
        .db
        .with_conn(|conn| device::get(conn, folder.device_id))?
        .ok_or_else(|| MediaLibError::UnknownDevice(format!("device {}", folder.device_id)))?;
    let mountpoint = core
        .devices
        .mountpoint(&device.uuid)
        .ok_or_else(|| MediaLibError::UnknownDevice(device.uuid.clone()))?;
    let base = mrl::with_trailing_slash(&mrl::from_path(&mountpoint));
    Ok(format!("{}{}", base, folder.path))
}

/// Resolve a directory MRL to its folder row, mapping through the device
/// registry so removable lookups use the relative stored form.
pub(crate) fn from_mrl(core: &Core, dir_mrl: &str, banned: BannedType) -> Result<Option<Folder>> {
    let path = mrl::to_path(dir_mrl)?;
    let Some(dev_info) = core.devices.device_for_path(&path) else {
        return Err(MediaLibError::UnknownDevice(dir_mrl.to_string()));
    };
    let device = core.db.with_conn(|conn| device::by_uuid(conn, &dev_info.uuid))?;
    let Some(device) = device else {
        return Ok(None);
    };
    let mountpoint_mrl = mrl::from_path(&dev_info.mountpoint);
    let stored = storable_path(dir_mrl, &mountpoint_mrl, device.is_removable)?;
    core.db
        .with_conn(|conn| by_path(conn, device.id, &stored, banned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storable_path_absolute_for_fixed_devices() {
        let stored = storable_path("file:///a/b", "file:///", false).unwrap();
        assert_eq!(stored, "file:///a/b/");
    }

    #[test]
    fn test_storable_path_relative_for_removable_devices() {
        let stored = storable_path("file:///mnt/usb/music/rock", "file:///mnt/usb", true).unwrap();
        assert_eq!(stored, "music/rock/");
        // The mountpoint itself never appears in the stored form
        assert!(!stored.contains("mnt"));
    }

    #[test]
    fn test_storable_path_rejects_foreign_mountpoint() {
        assert!(storable_path("file:///elsewhere/x", "file:///mnt/usb", true).is_err());
    }
}
