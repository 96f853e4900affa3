// Discoverer worker
//
// One background thread consuming a FIFO command queue. Commands are
// serialized; the idle flag flips whenever the queue drains and the
// in-flight crawl finishes.

pub(crate) mod crawler;

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::core::Core;
use crate::parser::Parser;

use crawler::FsDiscoverer;

#[derive(Debug)]
enum Command {
    Discover(String),
    ReloadAll,
    Reload(String),
    Remove(String),
    Ban(String),
    Unban(String),
    Stop,
}

pub(crate) struct DiscovererWorker {
    tx: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl DiscovererWorker {
    pub fn start(core: Arc<Core>, parser: Arc<Parser>) -> DiscovererWorker {
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("ml-discoverer".into())
            .spawn(move || worker_loop(rx, core, parser))
            .expect("Failed to spawn discoverer thread");
        DiscovererWorker {
            tx,
            thread: Some(thread),
        }
    }

    pub fn discover(&self, entry_point: &str) {
        let _ = self.tx.send(Command::Discover(entry_point.to_string()));
    }

    pub fn reload_all(&self) {
        let _ = self.tx.send(Command::ReloadAll);
    }

    pub fn reload(&self, entry_point: &str) {
        let _ = self.tx.send(Command::Reload(entry_point.to_string()));
    }

    pub fn remove(&self, entry_point: &str) {
        let _ = self.tx.send(Command::Remove(entry_point.to_string()));
    }

    pub fn ban(&self, entry_point: &str) {
        let _ = self.tx.send(Command::Ban(entry_point.to_string()));
    }

    pub fn unban(&self, entry_point: &str) {
        let _ = self.tx.send(Command::Unban(entry_point.to_string()));
    }

    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(Command::Stop);
            let _ = thread.join();
        }
    }
}

impl Drop for DiscovererWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(rx: Receiver<Command>, core: Arc<Core>, parser: Arc<Parser>) {
    log::info!("Entering discoverer thread");
    let discoverer = FsDiscoverer::new(Arc::clone(&core));
    loop {
        // Flag idle only when nothing is queued
        let cmd = match rx.try_recv() {
            Ok(cmd) => cmd,
            Err(TryRecvError::Empty) => {
                core.on_discoverer_idle_changed(true);
                match rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                }
            }
            Err(TryRecvError::Disconnected) => break,
        };
        if matches!(cmd, Command::Stop) {
            break;
        }
        core.on_discoverer_idle_changed(false);
        handle_command(cmd, &core, &parser, &discoverer);
    }
    core.on_discoverer_idle_changed(true);
    log::info!("Exiting discoverer thread");
}

fn handle_command(cmd: Command, core: &Core, parser: &Parser, discoverer: &FsDiscoverer) {
    match cmd {
        Command::Discover(ep) => {
            core.cb.on_discovery_started(&ep);
            match discoverer.discover(&ep) {
                Ok(tasks) => {
                    for task in tasks {
                        parser.parse(task);
                    }
                }
                Err(e) => log::error!("Failed to discover {}: {}", ep, e),
            }
            core.cb.on_discovery_completed(&ep);
        }
        Command::ReloadAll => match discoverer.entry_points() {
            Ok(entry_points) => {
                for (_, ep) in entry_points {
                    reload_one(core, parser, discoverer, &ep);
                }
            }
            Err(e) => log::error!("Failed to list entry points for reload: {}", e),
        },
        Command::Reload(ep) => reload_one(core, parser, discoverer, &ep),
        Command::Remove(ep) => {
            let success = match discoverer.remove(&ep) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("Failed to remove entry point {}: {}", ep, e);
                    false
                }
            };
            core.cb.on_entry_point_removed(&ep, success);
        }
        Command::Ban(ep) => {
            let success = match discoverer.ban(&ep) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("Failed to ban {}: {}", ep, e);
                    false
                }
            };
            core.cb.on_entry_point_banned(&ep, success);
        }
        Command::Unban(ep) => {
            let success = match discoverer.unban(&ep) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("Failed to unban {}: {}", ep, e);
                    false
                }
            };
            core.cb.on_entry_point_unbanned(&ep, success);
            if success {
                reload_one(core, parser, discoverer, &ep);
            }
        }
        Command::Stop => {}
    }
}

/// A reload is a discovery pass that reports through the reload callbacks.
fn reload_one(core: &Core, parser: &Parser, discoverer: &FsDiscoverer, ep: &str) {
    core.cb.on_reload_started(ep);
    match discoverer.discover(ep) {
        Ok(tasks) => {
            for task in tasks {
                parser.parse(task);
            }
        }
        // The device may come back on the next scheduled reload
        Err(e) => log::warn!("Failed to reload {}: {}", ep, e),
    }
    core.cb.on_reload_completed(ep);
}
