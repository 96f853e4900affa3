// Filesystem crawler.
//
// Walks a subtree rooted at an entry point and reconciles it with the
// folder/file tables: new candidate files become parse tasks, vanished
// entries are deleted (fixed devices) or flipped not-present (removable
// devices), banned folders are never descended.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::device::{self, Device};
use crate::catalog::folder::{self, BannedType, Folder};
use crate::catalog::task::{self, Task};
use crate::catalog::file;
use crate::constants::is_extension_supported;
use crate::core::Core;
use crate::error::{MediaLibError, Result};
use crate::mrl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeDecision {
    Descend,
    Skip,
    Enqueue,
    /// Abort the current folder entirely.
    Stop,
}

/// Decides what to do with one filesystem entry.
pub(crate) trait Probe: Send + Sync {
    fn entry(&self, path: &Path, is_directory: bool) -> ProbeDecision;
}

/// Default probe: descend visible directories, enqueue files whose
/// extension appears in the whitelist.
pub(crate) struct CrawlerProbe;

impl Probe for CrawlerProbe {
    fn entry(&self, path: &Path, is_directory: bool) -> ProbeDecision {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            return ProbeDecision::Skip;
        }
        if is_directory {
            return ProbeDecision::Descend;
        }
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(is_extension_supported);
        if supported {
            ProbeDecision::Enqueue
        } else {
            ProbeDecision::Skip
        }
    }
}

pub(crate) struct FsDiscoverer {
    core: Arc<Core>,
    probe: Box<dyn Probe>,
}

struct CrawlCtx {
    device: Device,
    tasks: Vec<Task>,
}

impl FsDiscoverer {
    pub fn new(core: Arc<Core>) -> FsDiscoverer {
        FsDiscoverer {
            core,
            probe: Box::new(CrawlerProbe),
        }
    }

    /// Crawl an entry point, creating its folder row if needed. Returns the
    /// tasks created along the way, ready for the parser.
    pub fn discover(&self, entry_point: &str) -> Result<Vec<Task>> {
        let path = mrl::to_path(entry_point)?;
        if !path.is_dir() {
            return Err(MediaLibError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{entry_point} is not a directory"),
            )));
        }
        let (device, mountpoint_mrl) = self.resolve_device(&path)?;
        let stored = folder::storable_path(entry_point, &mountpoint_mrl, device.is_removable)?;

        let root = self.core.db.with_conn(|conn| {
            if let Some(existing) = folder::by_path(conn, device.id, &stored, BannedType::Any)? {
                return Ok(Some(existing));
            }
            let id = folder::create(conn, &stored, None, device.id, device.is_removable)?;
            folder::get(conn, id)
        })?;
        let Some(root) = root else {
            return Err(MediaLibError::DbGeneric(format!(
                "failed to create entry point {entry_point}"
            )));
        };
        if root.is_blacklisted {
            log::warn!("Not discovering banned entry point {}", entry_point);
            return Ok(Vec::new());
        }

        let mut ctx = CrawlCtx {
            device,
            tasks: Vec::new(),
        };
        self.crawl_folder(&root, &path, &mut ctx)?;
        Ok(ctx.tasks)
    }

    /// Re-crawl every entry point whose device is currently reachable.
    pub fn entry_points(&self) -> Result<Vec<(Folder, String)>> {
        let folders = self.core.db.with_conn(|conn| folder::entry_points(conn))?;
        let mut reachable = Vec::new();
        for entry in folders {
            match folder::full_mrl(&self.core, &entry) {
                Ok(ep_mrl) => reachable.push((entry, ep_mrl)),
                Err(MediaLibError::UnknownDevice(uuid)) => {
                    log::info!("Skipping entry point on absent device {}", uuid);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reachable)
    }

    /// Mark (or create) a banned folder and drop everything beneath it.
    pub fn ban(&self, entry_point: &str) -> Result<()> {
        let path = mrl::to_path(entry_point)?;
        let (device, mountpoint_mrl) = self.resolve_device(&path)?;
        let stored = folder::storable_path(entry_point, &mountpoint_mrl, device.is_removable)?;
        self.core.db.transaction(|conn| {
            let row = match folder::by_path(conn, device.id, &stored, BannedType::Any)? {
                Some(existing) => existing,
                None => {
                    let id =
                        folder::create(conn, &stored, None, device.id, device.is_removable)?;
                    folder::get(conn, id)?.ok_or_else(|| {
                        MediaLibError::DbGeneric("banned folder vanished".into())
                    })?
                }
            };
            folder::set_blacklisted(conn, row.id, true)?;
            // Drop the indexed contents; FK cascades take files, tasks and media
            for child in folder::children(conn, row.id)? {
                folder::delete(conn, child.id)?;
            }
            for f in file::by_folder(conn, row.id)? {
                file::delete(conn, f.id)?;
            }
            Ok(())
        })?;
        self.core.caches.clear_all();
        Ok(())
    }

    pub fn unban(&self, entry_point: &str) -> Result<()> {
        let path = mrl::to_path(entry_point)?;
        let (device, mountpoint_mrl) = self.resolve_device(&path)?;
        let stored = folder::storable_path(entry_point, &mountpoint_mrl, device.is_removable)?;
        self.core.db.with_conn(|conn| {
            match folder::by_path(conn, device.id, &stored, BannedType::Yes)? {
                Some(row) => folder::set_blacklisted(conn, row.id, false),
                None => Err(MediaLibError::NotSupported(format!(
                    "{entry_point} is not banned"
                ))),
            }
        })
    }

    /// Remove an entry point and everything indexed beneath it.
    pub fn remove(&self, entry_point: &str) -> Result<()> {
        let row = folder::from_mrl(&self.core, entry_point, BannedType::Any)?
            .ok_or_else(|| MediaLibError::UnknownDevice(entry_point.to_string()))?;
        self.core.db.with_conn(|conn| folder::delete(conn, row.id))?;
        self.core.caches.clear_all();
        Ok(())
    }

    fn resolve_device(&self, path: &Path) -> Result<(Device, String)> {
        let info = self
            .core
            .devices
            .device_for_path(path)
            .ok_or_else(|| MediaLibError::UnknownDevice(path.display().to_string()))?;
        let device = self.core.db.with_conn(|conn| {
            device::get_or_create(conn, &info.uuid, "file://", info.is_removable)
        })?;
        Ok((device, mrl::from_path(&info.mountpoint)))
    }

    fn crawl_folder(&self, row: &Folder, fs_path: &Path, ctx: &mut CrawlCtx) -> Result<()> {
        self.core
            .cb
            .on_discovery_progress(&mrl::from_path(fs_path));

        let mut fs_files: HashMap<String, (PathBuf, i64, i64)> = HashMap::new();
        let mut fs_dirs: HashMap<String, PathBuf> = HashMap::new();

        let entries = match std::fs::read_dir(fs_path) {
            Ok(e) => e,
            Err(e) => {
                // One unreadable directory does not fail the crawl
                log::warn!("Failed to list {}: {}", fs_path.display(), e);
                return Ok(());
            }
        };
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            // Symlinked directories could loop the crawl
            if entry.file_type().map(|t| t.is_symlink()).unwrap_or(true) {
                continue;
            }
            let Ok(meta) = std::fs::metadata(&path) else {
                log::warn!("Failed to stat {}, skipping", path.display());
                continue;
            };
            match self.probe.entry(&path, meta.is_dir()) {
                ProbeDecision::Stop => return Ok(()),
                ProbeDecision::Skip => {}
                ProbeDecision::Descend => {
                    let name = mrl::file_name(&mrl::from_path(&path));
                    fs_dirs.insert(format!("{name}/"), path);
                }
                ProbeDecision::Enqueue => {
                    let mtime = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_secs() as i64)
                        .unwrap_or(0);
                    let name = mrl::file_name(&mrl::from_path(&path));
                    fs_files.insert(name, (path, mtime, meta.len() as i64));
                }
            }
        }

        self.reconcile_files(row, ctx, &fs_files)?;
        self.reconcile_folders(row, ctx, &fs_dirs)?;
        Ok(())
    }

    fn reconcile_files(
        &self,
        row: &Folder,
        ctx: &mut CrawlCtx,
        fs_files: &HashMap<String, (PathBuf, i64, i64)>,
    ) -> Result<()> {
        let known = self.core.db.with_conn(|conn| file::by_folder(conn, row.id))?;
        let mut seen: HashMap<String, &file::File> = HashMap::new();
        for f in &known {
            let name = if f.is_removable {
                f.mrl.clone()
            } else {
                mrl::file_name(&f.mrl)
            };
            seen.insert(name, f);
        }

        // Files gone from the filesystem
        for (name, f) in &seen {
            if fs_files.contains_key(name) {
                continue;
            }
            if ctx.device.is_removable {
                log::info!("{} disappeared from removable device, flagging", name);
                self.core
                    .db
                    .with_conn(|conn| file::set_present(conn, f.id, false))?;
            } else {
                log::info!("{} deleted, removing from catalog", name);
                self.core.db.with_conn(|conn| file::delete(conn, f.id))?;
            }
        }

        // New or changed files
        for (name, (path, mtime, size)) in fs_files {
            if let Some(f) = seen.get(name) {
                if f.last_modification_date == *mtime && f.size == *size {
                    if !f.is_present && ctx.device.is_removable {
                        self.core
                            .db
                            .with_conn(|conn| file::set_present(conn, f.id, true))?;
                    }
                    continue;
                }
                log::info!("{} changed, rescanning", name);
                self.core.db.with_conn(|conn| file::delete(conn, f.id))?;
            }
            let file_mrl = mrl::from_path(path);
            let created = self
                .core
                .db
                .with_conn(|conn| task::create(conn, &file_mrl, row.id, None));
            match created {
                Ok(t) => ctx.tasks.push(t),
                Err(e) if e.is_constraint() => {
                    // Most likely a restart after a crash mid-discovery
                    log::warn!(
                        "Failed to insert {}: {}. Assuming the file is already scheduled",
                        file_mrl,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn reconcile_folders(
        &self,
        row: &Folder,
        ctx: &mut CrawlCtx,
        fs_dirs: &HashMap<String, PathBuf>,
    ) -> Result<()> {
        let known = self.core.db.with_conn(|conn| folder::children(conn, row.id))?;
        let mut seen: HashMap<String, Folder> = HashMap::new();
        for child in known {
            let rel = child
                .path
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .map(|n| format!("{n}/"))
                .unwrap_or_default();
            seen.insert(rel, child);
        }

        for (rel, child) in &seen {
            if !fs_dirs.contains_key(rel) && !ctx.device.is_removable {
                log::info!("Folder {} deleted, removing from catalog", child.path);
                self.core.db.with_conn(|conn| folder::delete(conn, child.id))?;
            }
        }

        for (rel, path) in fs_dirs {
            let child = match seen.get(rel) {
                Some(existing) => existing.clone(),
                None => {
                    // The row may already exist parentless (a folder banned
                    // before its parent was ever crawled)
                    let stored = format!("{}{}", row.path, rel);
                    let device_id = ctx.device.id;
                    let is_removable = ctx.device.is_removable;
                    let parent_id = row.id;
                    self.core.db.with_conn(|conn| {
                        if let Some(existing) =
                            folder::by_path(conn, device_id, &stored, folder::BannedType::Any)?
                        {
                            return Ok(existing);
                        }
                        let id =
                            folder::create(conn, &stored, Some(parent_id), device_id, is_removable)?;
                        folder::get(conn, id)?.ok_or_else(|| {
                            crate::error::MediaLibError::DbGeneric(format!(
                                "folder {stored} vanished after creation"
                            ))
                        })
                    })?
                }
            };
            if child.is_blacklisted {
                continue;
            }
            self.crawl_folder(&child, path, ctx)?;
        }
        Ok(())
    }
}
