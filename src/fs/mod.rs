// Filesystem abstraction
//
// The host (or the bundled local lister) reports mounted volumes; the
// registry maps device uuids to their current mountpoint so MRLs of
// removable devices can be stored relative to it. Unplugging clears the
// mountpoint without touching any stored path.

pub mod volumes;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub uuid: String,
    pub mountpoint: PathBuf,
    pub is_removable: bool,
}

/// Host-provided volume enumeration. Plug/unplug events are pushed into the
/// facade separately; this is the initial/refresh snapshot.
pub trait DeviceLister: Send + Sync {
    fn devices(&self) -> Vec<DeviceInfo>;
}

#[derive(Debug, Clone)]
struct RegisteredDevice {
    mountpoint: Option<PathBuf>,
    is_removable: bool,
}

/// In-memory view of the currently known devices. Mutations go through the
/// facade under its lock so plug/unplug is atomic with ongoing discovery.
#[derive(Default)]
pub struct DeviceRegistry {
    inner: Mutex<HashMap<String, RegisteredDevice>>,
}

impl DeviceRegistry {
    pub fn register(&self, uuid: &str, mountpoint: PathBuf, is_removable: bool) {
        self.inner.lock().unwrap().insert(
            uuid.to_string(),
            RegisteredDevice {
                mountpoint: Some(mountpoint),
                is_removable,
            },
        );
    }

    /// Keep the device known but mark it unreachable.
    pub fn unregister_mountpoint(&self, uuid: &str) {
        if let Some(dev) = self.inner.lock().unwrap().get_mut(uuid) {
            dev.mountpoint = None;
        }
    }

    pub fn mountpoint(&self, uuid: &str) -> Option<PathBuf> {
        self.inner
            .lock()
            .unwrap()
            .get(uuid)
            .and_then(|d| d.mountpoint.clone())
    }

    pub fn is_present(&self, uuid: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(uuid)
            .is_some_and(|d| d.mountpoint.is_some())
    }

    /// The mounted device owning a path: longest mountpoint prefix wins.
    pub fn device_for_path(&self, path: &Path) -> Option<DeviceInfo> {
        let inner = self.inner.lock().unwrap();
        let mut best: Option<DeviceInfo> = None;
        for (uuid, dev) in inner.iter() {
            let Some(mp) = &dev.mountpoint else { continue };
            if path.starts_with(mp) {
                let better = match &best {
                    Some(b) => mp.as_os_str().len() > b.mountpoint.as_os_str().len(),
                    None => true,
                };
                if better {
                    best = Some(DeviceInfo {
                        uuid: uuid.clone(),
                        mountpoint: mp.clone(),
                        is_removable: dev.is_removable,
                    });
                }
            }
        }
        best
    }

    pub fn refresh(&self, lister: &dyn DeviceLister) {
        let snapshot = lister.devices();
        let mut inner = self.inner.lock().unwrap();
        // Devices missing from the snapshot lose their mountpoint but stay known
        for dev in inner.values_mut() {
            dev.mountpoint = None;
        }
        for info in snapshot {
            inner.insert(
                info.uuid,
                RegisteredDevice {
                    mountpoint: Some(info.mountpoint),
                    is_removable: info.is_removable,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let reg = DeviceRegistry::default();
        reg.register("root", PathBuf::from("/"), false);
        reg.register("usb", PathBuf::from("/mnt/usb"), true);

        let dev = reg.device_for_path(Path::new("/mnt/usb/music/a.mp3")).unwrap();
        assert_eq!(dev.uuid, "usb");
        assert!(dev.is_removable);

        let dev = reg.device_for_path(Path::new("/home/u/a.mp3")).unwrap();
        assert_eq!(dev.uuid, "root");
    }

    #[test]
    fn test_unplug_keeps_device_known() {
        let reg = DeviceRegistry::default();
        reg.register("usb", PathBuf::from("/mnt/usb"), true);
        reg.unregister_mountpoint("usb");
        assert!(!reg.is_present("usb"));
        assert!(reg.mountpoint("usb").is_none());
        assert!(reg.device_for_path(Path::new("/mnt/usb/a.mp3")).is_none());

        // Remount elsewhere
        reg.register("usb", PathBuf::from("/media/usb"), true);
        assert_eq!(reg.mountpoint("usb").unwrap(), PathBuf::from("/media/usb"));
    }
}
