// Shared state handed to every worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::CacheSet;
use crate::callbacks::MediaLibraryCb;
use crate::db::Db;
use crate::fs::DeviceRegistry;
use crate::notifier::NotifierHandle;

pub(crate) struct Core {
    pub db: Db,
    pub caches: CacheSet,
    pub notifier: NotifierHandle,
    pub cb: Arc<dyn MediaLibraryCb>,
    pub thumbnail_dir: PathBuf,
    pub devices: DeviceRegistry,
    discoverer_idle: AtomicBool,
    parser_idle: AtomicBool,
}

impl Core {
    pub fn new(
        db: Db,
        notifier: NotifierHandle,
        cb: Arc<dyn MediaLibraryCb>,
        thumbnail_dir: PathBuf,
    ) -> Core {
        Core {
            db,
            caches: CacheSet::default(),
            notifier,
            cb,
            thumbnail_dir,
            devices: DeviceRegistry::default(),
            discoverer_idle: AtomicBool::new(true),
            parser_idle: AtomicBool::new(true),
        }
    }

    /// Both workers must be idle before the host hears "idle"; any worker
    /// waking up reports "busy" immediately. Emitted once per transition.
    pub fn on_discoverer_idle_changed(&self, idle: bool) {
        if self
            .discoverer_idle
            .compare_exchange(!idle, idle, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            log::info!(
                "{}",
                if idle {
                    "Discoverer thread went idle"
                } else {
                    "Discoverer thread was resumed"
                }
            );
            if !idle || self.parser_idle.load(Ordering::SeqCst) {
                self.cb.on_background_tasks_idle_changed(idle);
            }
        }
    }

    pub fn on_parser_idle_changed(&self, idle: bool) {
        if self
            .parser_idle
            .compare_exchange(!idle, idle, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            log::info!(
                "{}",
                if idle {
                    "All parser services went idle"
                } else {
                    "Parser services were resumed"
                }
            );
            if !idle || self.discoverer_idle.load(Ordering::SeqCst) {
                self.cb.on_background_tasks_idle_changed(idle);
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.discoverer_idle.load(Ordering::SeqCst) && self.parser_idle.load(Ordering::SeqCst)
    }
}
