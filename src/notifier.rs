// Modification notifier
//
// Batches entity change events coming from database hooks and parser
// progress, then flushes them to the host callback. Events are held for a
// debounce window so a burst of inserts lands as one callback; duplicates
// within a batch are dropped. Shutdown drains whatever is queued.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::callbacks::MediaLibraryCb;
use crate::constants::NOTIFIER_DEBOUNCE_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Media,
    Artist,
    Album,
    AlbumTrack,
    Playlist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
    Added,
    Modified,
    Removed,
}

enum Msg {
    Event(Entity, Change, i64),
    Stop,
}

/// Cloneable posting side, safe to call from hook context.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: Sender<Msg>,
}

impl NotifierHandle {
    pub fn notify(&self, entity: Entity, change: Change, id: i64) {
        // A send can only fail during teardown; late events are dropped.
        let _ = self.tx.send(Msg::Event(entity, change, id));
    }
}

pub struct Notifier {
    tx: Sender<Msg>,
    thread: Option<JoinHandle<()>>,
}

impl Notifier {
    pub fn start(cb: Arc<dyn MediaLibraryCb>) -> Notifier {
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("ml-notifier".into())
            .spawn(move || notifier_loop(rx, cb))
            .expect("Failed to spawn notifier thread");
        Notifier {
            tx,
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> NotifierHandle {
        NotifierHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drain pending events and join the thread.
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(Msg::Stop);
            let _ = thread.join();
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

fn notifier_loop(rx: Receiver<Msg>, cb: Arc<dyn MediaLibraryCb>) {
    let mut batch: HashMap<(Entity, Change), Vec<i64>> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let msg = match deadline {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(at) => {
                let now = Instant::now();
                if at <= now {
                    Err(RecvTimeoutError::Timeout)
                } else {
                    rx.recv_timeout(at - now)
                }
            }
        };
        match msg {
            Ok(Msg::Event(entity, change, id)) => {
                if deadline.is_none() {
                    deadline = Some(Instant::now() + Duration::from_millis(NOTIFIER_DEBOUNCE_MS));
                }
                let ids = batch.entry((entity, change)).or_default();
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                flush(&mut batch, &*cb);
                deadline = None;
            }
            Ok(Msg::Stop) | Err(RecvTimeoutError::Disconnected) => {
                flush(&mut batch, &*cb);
                return;
            }
        }
    }
}

fn flush(batch: &mut HashMap<(Entity, Change), Vec<i64>>, cb: &dyn MediaLibraryCb) {
    for ((entity, change), ids) in batch.drain() {
        if ids.is_empty() {
            continue;
        }
        match (entity, change) {
            (Entity::Media, Change::Added) => cb.on_media_added(ids),
            (Entity::Media, Change::Modified) => cb.on_media_updated(ids),
            (Entity::Media, Change::Removed) => cb.on_media_deleted(ids),
            (Entity::Artist, Change::Added) => cb.on_artists_added(ids),
            (Entity::Artist, Change::Modified) => cb.on_artists_modified(ids),
            (Entity::Artist, Change::Removed) => cb.on_artists_deleted(ids),
            (Entity::Album, Change::Added) => cb.on_albums_added(ids),
            (Entity::Album, Change::Modified) => cb.on_albums_modified(ids),
            (Entity::Album, Change::Removed) => cb.on_albums_deleted(ids),
            (Entity::AlbumTrack, Change::Added) => cb.on_tracks_added(ids),
            (Entity::AlbumTrack, Change::Removed) => cb.on_tracks_deleted(ids),
            // Tracks expose no modification callback
            (Entity::AlbumTrack, Change::Modified) => {}
            (Entity::Playlist, Change::Added) => cb.on_playlists_added(ids),
            (Entity::Playlist, Change::Modified) => cb.on_playlists_modified(ids),
            (Entity::Playlist, Change::Removed) => cb.on_playlists_deleted(ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCb {
        added: Mutex<Vec<Vec<i64>>>,
        removed: Mutex<Vec<Vec<i64>>>,
    }

    impl MediaLibraryCb for RecordingCb {
        fn on_media_added(&self, ids: Vec<i64>) {
            self.added.lock().unwrap().push(ids);
        }
        fn on_media_deleted(&self, ids: Vec<i64>) {
            self.removed.lock().unwrap().push(ids);
        }
    }

    #[test]
    fn test_events_are_batched_and_deduplicated() {
        let cb = Arc::new(RecordingCb::default());
        let mut notifier = Notifier::start(cb.clone());
        let handle = notifier.handle();
        handle.notify(Entity::Media, Change::Added, 1);
        handle.notify(Entity::Media, Change::Added, 2);
        handle.notify(Entity::Media, Change::Added, 1);
        notifier.stop();

        let added = cb.added.lock().unwrap();
        assert_eq!(added.len(), 1);
        let mut ids = added[0].clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_stop_drains_pending_events() {
        let cb = Arc::new(RecordingCb::default());
        let mut notifier = Notifier::start(cb.clone());
        notifier.handle().notify(Entity::Media, Change::Removed, 9);
        // Stop immediately, well within the debounce window
        notifier.stop();
        assert_eq!(cb.removed.lock().unwrap().as_slice(), &[vec![9]]);
    }
}
