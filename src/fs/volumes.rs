// Local volume enumeration.
//
// Best-effort lister built on the platform tools; hosts embedding the
// library on platforms with richer APIs provide their own DeviceLister.

use std::path::PathBuf;
use std::process::Command;

use super::{DeviceInfo, DeviceLister};

pub struct LocalDeviceLister;

impl DeviceLister for LocalDeviceLister {
    fn devices(&self) -> Vec<DeviceInfo> {
        list_volumes()
    }
}

#[cfg(target_os = "linux")]
fn list_volumes() -> Vec<DeviceInfo> {
    // df -P gives one parseable line per mounted filesystem
    let output = match Command::new("df").args(["-P", "-l"]).output() {
        Ok(o) => o,
        Err(e) => {
            log::warn!("Failed to run df: {}", e);
            return Vec::new();
        }
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut devices = Vec::new();
    for line in stdout.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let Some(source) = fields.next() else { continue };
        let Some(mountpoint) = fields.last() else { continue };
        if !source.starts_with("/dev/") {
            continue;
        }
        let uuid = blkid_uuid(source)
            .unwrap_or_else(|| format!("mnt-{}", mountpoint.trim_start_matches('/').replace('/', "-")));
        devices.push(DeviceInfo {
            uuid,
            mountpoint: PathBuf::from(mountpoint),
            is_removable: is_removable_mountpoint(mountpoint),
        });
    }
    devices
}

#[cfg(target_os = "linux")]
fn blkid_uuid(device: &str) -> Option<String> {
    let output = Command::new("blkid")
        .args(["-s", "UUID", "-o", "value", device])
        .output()
        .ok()?;
    let uuid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if uuid.is_empty() {
        None
    } else {
        Some(uuid)
    }
}

#[cfg(target_os = "linux")]
fn is_removable_mountpoint(mountpoint: &str) -> bool {
    mountpoint.starts_with("/media/")
        || mountpoint.starts_with("/run/media/")
        || mountpoint.starts_with("/mnt/")
}

#[cfg(target_os = "macos")]
fn list_volumes() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    // The boot volume
    devices.push(DeviceInfo {
        uuid: diskutil_uuid("/").unwrap_or_else(|| "macos-root".to_string()),
        mountpoint: PathBuf::from("/"),
        is_removable: false,
    });
    let entries = match std::fs::read_dir("/Volumes") {
        Ok(e) => e,
        Err(_) => return devices,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let mountpoint = path.to_string_lossy().to_string();
        let Some(uuid) = diskutil_uuid(&mountpoint) else {
            continue;
        };
        devices.push(DeviceInfo {
            uuid,
            mountpoint: path,
            is_removable: true,
        });
    }
    devices
}

#[cfg(target_os = "macos")]
fn diskutil_uuid(mountpoint: &str) -> Option<String> {
    let output = Command::new("diskutil")
        .args(["info", mountpoint])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.contains("Volume UUID:"))
        .and_then(|line| line.split(':').nth(1))
        .map(|s| s.trim().to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn list_volumes() -> Vec<DeviceInfo> {
    Vec::new()
}
