// Entity cache
//
// Process-wide identity map (table, primary key) -> live entity. Entities are
// immutable row snapshots behind Arc; the cache keeps only weak handles, so a
// row snapshot dies with its last external holder. Row mutations go through
// SQL and evict the snapshot; deletion hooks evict as well.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::error::Result;

pub struct EntityCache<T> {
    inner: Mutex<HashMap<i64, Weak<T>>>,
}

impl<T> Default for EntityCache<T> {
    fn default() -> Self {
        EntityCache {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> EntityCache<T> {
    /// Fetch-through: a live cached entity is returned directly; on miss,
    /// `load` materializes the row and the result is inserted atomically.
    /// The shard lock is held across `load`, which serializes
    /// materialization per table and guarantees two concurrent fetches of
    /// the same key observe the same Arc.
    pub fn fetch(
        &self,
        id: i64,
        load: impl FnOnce() -> Result<Option<T>>,
    ) -> Result<Option<Arc<T>>> {
        let mut map = self.inner.lock().unwrap();
        if let Some(weak) = map.get(&id) {
            if let Some(live) = weak.upgrade() {
                return Ok(Some(live));
            }
        }
        match load()? {
            Some(row) => {
                let entity = Arc::new(row);
                map.insert(id, Arc::downgrade(&entity));
                Ok(Some(entity))
            }
            None => {
                map.remove(&id);
                Ok(None)
            }
        }
    }

    /// Drop the entry for a row; the next fetch re-reads the database.
    pub fn evict(&self, id: i64) {
        self.inner.lock().unwrap().remove(&id);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

/// One shard per cached table. Device rows are tiny and always looked up by
/// uuid, so they bypass the cache.
#[derive(Default)]
pub struct CacheSet {
    pub folder: EntityCache<crate::catalog::folder::Folder>,
    pub file: EntityCache<crate::catalog::file::File>,
    pub media: EntityCache<crate::catalog::media::Media>,
    pub album: EntityCache<crate::catalog::album::Album>,
    pub album_track: EntityCache<crate::catalog::album_track::AlbumTrack>,
    pub artist: EntityCache<crate::catalog::artist::Artist>,
    pub genre: EntityCache<crate::catalog::genre::Genre>,
    pub show: EntityCache<crate::catalog::show::Show>,
    pub show_episode: EntityCache<crate::catalog::show::ShowEpisode>,
    pub movie: EntityCache<crate::catalog::movie::Movie>,
    pub playlist: EntityCache<crate::catalog::playlist::Playlist>,
    pub label: EntityCache<crate::catalog::label::Label>,
}

impl CacheSet {
    /// Drop every shard (rescan, teardown).
    pub fn clear_all(&self) {
        self.folder.clear();
        self.file.clear();
        self.media.clear();
        self.album.clear();
        self.album_track.clear();
        self.artist.clear();
        self.genre.clear();
        self.show.clear();
        self.show_episode.clear();
        self.movie.clear();
        self.playlist.clear();
        self.label.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_two_fetches_return_the_same_instance() {
        let cache: EntityCache<String> = EntityCache::default();
        let loads = AtomicUsize::new(0);
        let a = cache
            .fetch(1, || {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Some("one".to_string()))
            })
            .unwrap()
            .unwrap();
        let b = cache
            .fetch(1, || {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Some("one".to_string()))
            })
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eviction_materializes_a_fresh_entity() {
        let cache: EntityCache<String> = EntityCache::default();
        let a = cache.fetch(1, || Ok(Some("v1".to_string()))).unwrap().unwrap();
        cache.evict(1);
        let b = cache.fetch(1, || Ok(Some("v2".to_string()))).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(*b, "v2");
    }

    #[test]
    fn test_cache_holds_no_ownership() {
        let cache: EntityCache<String> = EntityCache::default();
        {
            let _live = cache.fetch(1, || Ok(Some("x".to_string()))).unwrap();
        }
        // Last holder dropped: the weak handle is dead and load runs again
        let loads = AtomicUsize::new(0);
        cache
            .fetch(1, || {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Some("x".to_string()))
            })
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_row_is_not_cached() {
        let cache: EntityCache<String> = EntityCache::default();
        assert!(cache.fetch(7, || Ok(None)).unwrap().is_none());
        let found = cache.fetch(7, || Ok(Some("late".to_string()))).unwrap();
        assert_eq!(*found.unwrap(), "late");
    }
}
