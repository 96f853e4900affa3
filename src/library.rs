// Media library facade.
//
// Thin synchronous surface over the catalog, the discoverer and the parser.
// Handled failures return None/false and log context; no error type crosses
// this boundary.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::callbacks::{MediaLibraryCb, NoopCb};
use crate::catalog::album::{self, Album};
use crate::catalog::album_track::AlbumTrack;
use crate::catalog::artist::{self, Artist};
use crate::catalog::device;
use crate::catalog::file::{self, FileType};
use crate::catalog::folder::{self, BannedType, Folder};
use crate::catalog::genre::{self, Genre};
use crate::catalog::history::{self, HistoryEntry};
use crate::catalog::label::{self, Label};
use crate::catalog::media::{self, Media, MediaSubType, MediaType};
use crate::catalog::movie::{self, Movie};
use crate::catalog::playlist::{self, Playlist};
use crate::catalog::show::{self, Show, ShowEpisode};
use crate::catalog::{task, SortingCriteria};
use crate::constants::{DB_BUSY_RETRIES, SEARCH_MIN_PATTERN_LEN};
use crate::core::Core;
use crate::db::{self, Db, HookReason};
use crate::discoverer::DiscovererWorker;
use crate::error::{MediaLibError, Result};
use crate::fs::volumes::LocalDeviceLister;
use crate::fs::DeviceLister;
use crate::mrl;
use crate::notifier::{Change, Entity, Notifier};
use crate::parser::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitResult {
    Success,
    AlreadyInitialized,
    DbReset,
    Failed,
}

#[derive(Debug, Default)]
pub struct MediaSearchAggregate {
    pub tracks: Vec<Media>,
    pub movies: Vec<Media>,
    pub episodes: Vec<Media>,
    pub others: Vec<Media>,
}

#[derive(Debug, Default)]
pub struct SearchAggregate {
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
    pub genres: Vec<Genre>,
    pub media: MediaSearchAggregate,
    pub playlists: Vec<Playlist>,
}

pub struct MediaLibrary {
    core: Option<Arc<Core>>,
    notifier: Option<Notifier>,
    parser: Option<Arc<Parser>>,
    discoverer: Option<DiscovererWorker>,
    device_lister: Arc<dyn DeviceLister>,
    /// Serializes plug/unplug against start/refresh.
    device_lock: Mutex<()>,
}

impl Default for MediaLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaLibrary {
    pub fn new() -> MediaLibrary {
        MediaLibrary {
            core: None,
            notifier: None,
            parser: None,
            discoverer: None,
            device_lister: Arc::new(LocalDeviceLister),
            device_lock: Mutex::new(()),
        }
    }

    /// Must be called before initialize.
    pub fn set_device_lister(&mut self, lister: Arc<dyn DeviceLister>) {
        assert!(self.core.is_none(), "device lister set after initialization");
        self.device_lister = lister;
    }

    /// Open (or create) the database, run migrations, start the notifier.
    pub fn initialize(
        &mut self,
        db_path: &str,
        thumbnail_dir: &Path,
        cb: Option<Arc<dyn MediaLibraryCb>>,
    ) -> InitResult {
        log::info!("Initializing medialibrary...");
        if self.core.is_some() {
            log::info!("...Already initialized");
            return InitResult::AlreadyInitialized;
        }
        if let Err(e) = std::fs::create_dir_all(thumbnail_dir) {
            log::error!("Failed to create thumbnail directory: {}", e);
            return InitResult::Failed;
        }
        let db = match Db::open(db_path) {
            Ok(db) => db,
            Err(e) => {
                log::error!("Failed to open database {}: {}", db_path, e);
                return InitResult::Failed;
            }
        };
        let cb = cb.unwrap_or_else(|| Arc::new(NoopCb));
        let notifier = Notifier::start(Arc::clone(&cb));
        let core = Arc::new(Core::new(
            db,
            notifier.handle(),
            cb,
            thumbnail_dir.to_path_buf(),
        ));
        register_entity_hooks(&core);

        let setup = match crate::db::migrations::prepare(&core.db) {
            Ok(setup) => setup,
            Err(MediaLibError::DbCorrupt(e)) => {
                log::error!("Database is corrupted ({}), recreating it", e);
                match crate::db::migrations::recreate_database(&core.db) {
                    Ok(()) => crate::db::migrations::Setup::Reset,
                    Err(e) => {
                        log::error!("Can't initialize medialibrary: {}", e);
                        return InitResult::Failed;
                    }
                }
            }
            Err(e) => {
                log::error!("Can't initialize medialibrary: {}", e);
                return InitResult::Failed;
            }
        };
        self.core = Some(core);
        self.notifier = Some(notifier);
        log::info!("Successfully initialized");
        match setup {
            crate::db::migrations::Setup::Reset => InitResult::DbReset,
            _ => InitResult::Success,
        }
    }

    /// Spawn the background workers. Call once, after initialize.
    pub fn start(&mut self) -> bool {
        let Some(core) = self.core.clone() else {
            log::error!("start() called before initialize()");
            return false;
        };
        if self.parser.is_some() {
            return false;
        }
        self.refresh_devices();

        let parser = Arc::new(Parser::new(Arc::clone(&core)));
        if let Err(e) = parser.start() {
            log::error!("Failed to start parser: {}", e);
            return false;
        }
        self.discoverer = Some(DiscovererWorker::start(core, Arc::clone(&parser)));
        self.parser = Some(parser);
        true
    }

    fn core(&self) -> Option<&Arc<Core>> {
        self.core.as_ref()
    }

    // ----- Media -----

    pub fn media(&self, id: i64) -> Option<Arc<Media>> {
        let core = self.core()?;
        log_err(media::fetch(core, id)).flatten()
    }

    /// Resolve a media by MRL: external lookup first, then the device-aware
    /// folder/file resolution (removable devices match on relative paths).
    pub fn media_by_mrl(&self, raw_mrl: &str) -> Option<Arc<Media>> {
        let core = self.core()?;
        log::info!("Fetching media from mrl: {}", raw_mrl);
        let normalized = mrl::normalize(raw_mrl);

        let external =
            log_err(core.db.with_conn(|conn| file::from_external_mrl(conn, &normalized)))?;
        if let Some(f) = external {
            return f.media_id.and_then(|id| log_err(media::fetch(core, id)).flatten());
        }

        let path = mrl::to_path(&normalized).ok()?;
        let dev_info = core.devices.device_for_path(&path)?;
        let found = if !dev_info.is_removable {
            log_err(core.db.with_conn(|conn| file::from_mrl(conn, &normalized)))?
        } else {
            let parent =
                log_err(folder::from_mrl(core, &mrl::directory(&normalized), BannedType::No))??;
            if !parent.is_present {
                log::info!("Found a folder containing {} but it is not present", raw_mrl);
                return None;
            }
            log_err(core.db.with_conn(|conn| {
                file::from_file_name(conn, &mrl::file_name(&normalized), parent.id)
            }))?
        };
        found
            .and_then(|f| f.media_id)
            .and_then(|id| log_err(media::fetch(core, id)).flatten())
    }

    /// Register a media living outside any entry point.
    pub fn add_external_media(&self, raw_mrl: &str) -> Option<Arc<Media>> {
        self.add_external(raw_mrl, MediaType::External)
    }

    pub fn add_stream(&self, raw_mrl: &str) -> Option<Arc<Media>> {
        self.add_external(raw_mrl, MediaType::Stream)
    }

    fn add_external(&self, raw_mrl: &str, media_type: MediaType) -> Option<Arc<Media>> {
        let core = self.core()?;
        let normalized = mrl::normalize(raw_mrl);
        let title = mrl::decoded_file_name(&normalized);
        let created = db::with_retries(DB_BUSY_RETRIES, || {
            core.db.transaction(|conn| {
                let id = media::create(conn, media_type, &title, &title)?;
                if file::create_external(conn, id, FileType::Main, &normalized)?.is_none() {
                    return Err(crate::error::MediaLibError::DbConstraint(format!(
                        "{normalized} is already known"
                    )));
                }
                Ok(id)
            })
        });
        match created {
            Ok(id) => {
                core.notifier.notify(Entity::Media, Change::Added, id);
                log_err(media::fetch(core, id)).flatten()
            }
            Err(e) => {
                log::error!("Failed to create external media: {}", e);
                None
            }
        }
    }

    pub fn delete_media(&self, id: i64) -> bool {
        let Some(core) = self.core() else { return false };
        log_err(core.db.with_conn(|conn| media::delete(conn, id))).is_some()
    }

    pub fn audio_files(&self, sort: SortingCriteria, desc: bool) -> Vec<Media> {
        self.list_media(MediaType::Audio, sort, desc)
    }

    pub fn video_files(&self, sort: SortingCriteria, desc: bool) -> Vec<Media> {
        self.list_media(MediaType::Video, sort, desc)
    }

    fn list_media(&self, media_type: MediaType, sort: SortingCriteria, desc: bool) -> Vec<Media> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| media::list_by_type(conn, media_type, sort, desc)))
            .unwrap_or_default()
    }

    pub fn set_media_favorite(&self, id: i64, favorite: bool) -> bool {
        let Some(core) = self.core() else { return false };
        let ok = log_err(core.db.with_conn(|conn| media::set_favorite(conn, id, favorite)));
        core.caches.media.evict(id);
        ok.is_some()
    }

    /// The file rows realizing a media.
    pub fn media_files(&self, media_id: i64) -> Vec<crate::catalog::file::File> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| file::of_media(conn, media_id))).unwrap_or_default()
    }

    /// Full MRL of a file, joining the owning device's current mountpoint
    /// for removable files. None when the device is unplugged.
    pub fn file_mrl(&self, file_id: i64) -> Option<String> {
        let core = self.core()?;
        let f = log_err(file::fetch(core, file_id)).flatten()?;
        log_err(file::full_mrl(core, &f))
    }

    pub fn media_audio_tracks(&self, media_id: i64) -> Vec<crate::catalog::track::AudioTrack> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| crate::catalog::track::audio_tracks_of(conn, media_id)))
            .unwrap_or_default()
    }

    pub fn media_video_tracks(&self, media_id: i64) -> Vec<crate::catalog::track::VideoTrack> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| crate::catalog::track::video_tracks_of(conn, media_id)))
            .unwrap_or_default()
    }

    /// Records a playback on the media itself (distinct from stream history).
    pub fn increase_play_count(&self, id: i64) -> bool {
        let Some(core) = self.core() else { return false };
        let ok = log_err(core.db.with_conn(|conn| media::increase_play_count(conn, id)));
        core.caches.media.evict(id);
        ok.is_some()
    }

    // ----- Albums / artists / genres -----

    pub fn album(&self, id: i64) -> Option<Arc<Album>> {
        let core = self.core()?;
        log_err(album::fetch(core, id)).flatten()
    }

    pub fn albums(&self, sort: SortingCriteria, desc: bool) -> Vec<Album> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| album::list_all(conn, sort, desc))).unwrap_or_default()
    }

    pub fn album_track(&self, id: i64) -> Option<Arc<AlbumTrack>> {
        let core = self.core()?;
        log_err(crate::catalog::album_track::fetch(core, id)).flatten()
    }

    pub fn album_tracks(&self, album_id: i64) -> Vec<AlbumTrack> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| crate::catalog::album_track::by_album(conn, album_id)))
            .unwrap_or_default()
    }

    pub fn artist(&self, id: i64) -> Option<Arc<Artist>> {
        let core = self.core()?;
        log_err(artist::fetch(core, id)).flatten()
    }

    pub fn artist_by_name(&self, name: &str) -> Option<Artist> {
        let core = self.core()?;
        log_err(core.db.with_conn(|conn| artist::by_name(conn, name)))?
    }

    /// List artists. Criteria without an artist column order on the
    /// counters: Duration/PlayCount on nb_tracks, the date criteria on
    /// nb_albums; Default and Alpha order on name.
    pub fn artists(&self, include_all: bool, sort: SortingCriteria, desc: bool) -> Vec<Artist> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| artist::list_all(conn, include_all, sort, desc)))
            .unwrap_or_default()
    }

    pub fn albums_of_artist(&self, artist_id: i64) -> Vec<Album> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| album::by_artist(conn, artist_id))).unwrap_or_default()
    }

    pub fn genre(&self, id: i64) -> Option<Arc<Genre>> {
        let core = self.core()?;
        log_err(genre::fetch(core, id)).flatten()
    }

    pub fn genres(&self, desc: bool) -> Vec<Genre> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| genre::list_all(conn, desc))).unwrap_or_default()
    }

    // ----- Shows / movies -----

    pub fn show(&self, title: &str) -> Option<Show> {
        let core = self.core()?;
        log_err(core.db.with_conn(|conn| show::by_title(conn, title)))?
    }

    pub fn create_show(&self, title: &str) -> Option<Show> {
        let core = self.core()?;
        let id = log_err(core.db.with_conn(|conn| show::create(conn, title)))?;
        log_err(core.db.with_conn(|conn| show::get(conn, id)))?
    }

    pub fn show_by_id(&self, id: i64) -> Option<Arc<Show>> {
        let core = self.core()?;
        log_err(show::fetch(core, id)).flatten()
    }

    pub fn add_show_episode(
        &self,
        show_id: i64,
        media_id: i64,
        season: Option<i64>,
        episode: Option<i64>,
    ) -> Option<Arc<ShowEpisode>> {
        let core = self.core()?;
        let id = log_err(core.db.transaction(|conn| {
            show::add_episode(conn, show_id, media_id, season, episode)
        }))?;
        core.caches.media.evict(media_id);
        log_err(show::fetch_episode(core, id)).flatten()
    }

    pub fn show_episode_of_media(&self, media_id: i64) -> Option<ShowEpisode> {
        let core = self.core()?;
        log_err(core.db.with_conn(|conn| show::episode_from_media(conn, media_id)))?
    }

    pub fn show_episodes(&self, show_id: i64) -> Vec<ShowEpisode> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| show::episodes(conn, show_id))).unwrap_or_default()
    }

    pub fn movie(&self, title: &str) -> Option<Movie> {
        let core = self.core()?;
        log_err(core.db.with_conn(|conn| movie::by_title(conn, title)))?
    }

    pub fn create_movie(&self, media_id: i64, title: &str) -> Option<Arc<Movie>> {
        let core = self.core()?;
        let id =
            log_err(core.db.transaction(|conn| movie::create(conn, media_id, title)))?;
        core.caches.media.evict(media_id);
        log_err(movie::fetch(core, id)).flatten()
    }

    pub fn movie_of_media(&self, media_id: i64) -> Option<Movie> {
        let core = self.core()?;
        log_err(core.db.with_conn(|conn| movie::from_media(conn, media_id)))?
    }

    // ----- Playlists -----

    pub fn playlist(&self, id: i64) -> Option<Arc<Playlist>> {
        let core = self.core()?;
        log_err(playlist::fetch(core, id)).flatten()
    }

    pub fn playlists(&self, desc: bool) -> Vec<Playlist> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| playlist::list_all(conn, desc))).unwrap_or_default()
    }

    pub fn create_playlist(&self, name: &str) -> Option<Arc<Playlist>> {
        let core = self.core()?;
        let id = log_err(core.db.with_conn(|conn| playlist::create(conn, name, None)))?;
        core.notifier.notify(Entity::Playlist, Change::Added, id);
        log_err(playlist::fetch(core, id)).flatten()
    }

    pub fn delete_playlist(&self, id: i64) -> bool {
        let Some(core) = self.core() else { return false };
        log_err(core.db.with_conn(|conn| playlist::delete(conn, id))).is_some()
    }

    pub fn rename_playlist(&self, id: i64, name: &str) -> bool {
        self.playlist_op(id, |conn| playlist::set_name(conn, id, name))
    }

    pub fn playlist_append(&self, playlist_id: i64, media_id: i64) -> bool {
        self.playlist_op(playlist_id, |conn| playlist::append(conn, playlist_id, media_id))
    }

    pub fn playlist_add_at(&self, playlist_id: i64, media_id: i64, position: i64) -> bool {
        self.playlist_op(playlist_id, |conn| {
            playlist::add_at(conn, playlist_id, media_id, position)
        })
    }

    pub fn playlist_move(&self, playlist_id: i64, media_id: i64, position: i64) -> bool {
        self.playlist_op(playlist_id, |conn| {
            playlist::move_media(conn, playlist_id, media_id, position)
        })
    }

    pub fn playlist_remove(&self, playlist_id: i64, media_id: i64) -> bool {
        self.playlist_op(playlist_id, |conn| {
            playlist::remove_media(conn, playlist_id, media_id)
        })
    }

    fn playlist_op(
        &self,
        playlist_id: i64,
        op: impl FnOnce(&rusqlite::Connection) -> Result<()>,
    ) -> bool {
        let Some(core) = self.core() else { return false };
        let ok = log_err(core.db.transaction(op)).is_some();
        if ok {
            core.notifier
                .notify(Entity::Playlist, Change::Modified, playlist_id);
        }
        ok
    }

    pub fn playlist_media(&self, playlist_id: i64) -> Vec<Media> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| playlist::media_of(conn, playlist_id)))
            .unwrap_or_default()
    }

    // ----- Labels -----

    pub fn create_label(&self, name: &str) -> Option<Arc<Label>> {
        let core = self.core()?;
        match core.db.with_conn(|conn| label::create(conn, name)) {
            Ok(id) => log_err(label::fetch(core, id)).flatten(),
            Err(e) => {
                log::error!("Failed to create a label: {}", e);
                None
            }
        }
    }

    pub fn delete_label(&self, id: i64) -> bool {
        let Some(core) = self.core() else { return false };
        log_err(core.db.with_conn(|conn| label::delete(conn, id))).is_some()
    }

    pub fn attach_label(&self, label_id: i64, media_id: i64) -> bool {
        let Some(core) = self.core() else { return false };
        log_err(core.db.with_conn(|conn| label::attach(conn, label_id, media_id))).is_some()
    }

    pub fn detach_label(&self, label_id: i64, media_id: i64) -> bool {
        let Some(core) = self.core() else { return false };
        log_err(core.db.with_conn(|conn| label::detach(conn, label_id, media_id))).is_some()
    }

    pub fn labels_of_media(&self, media_id: i64) -> Vec<Label> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| label::of_media(conn, media_id))).unwrap_or_default()
    }

    pub fn media_of_label(&self, label_id: i64) -> Vec<Media> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| label::media_of(conn, label_id))).unwrap_or_default()
    }

    // ----- History -----

    /// Record an externally streamed MRL (capped log, oldest evicted).
    pub fn add_to_stream_history(&self, raw_mrl: &str) -> bool {
        let Some(core) = self.core() else { return false };
        let normalized = mrl::normalize(raw_mrl);
        log_err(core.db.with_conn(|conn| history::insert(conn, &normalized))).is_some()
    }

    pub fn last_streams_played(&self) -> Vec<HistoryEntry> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| history::fetch_all(conn))).unwrap_or_default()
    }

    pub fn last_media_played(&self) -> Vec<Media> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| media::fetch_history(conn))).unwrap_or_default()
    }

    pub fn clear_history(&self) -> bool {
        let Some(core) = self.core() else { return false };
        let res = db::with_retries(DB_BUSY_RETRIES, || {
            core.db.transaction(|conn| {
                media::clear_history(conn)?;
                history::clear(conn)?;
                Ok(())
            })
        });
        match res {
            Ok(()) => {
                core.caches.media.clear();
                true
            }
            Err(e) => {
                log::error!("Failed to clear history: {}", e);
                false
            }
        }
    }

    // ----- Search -----

    fn validate_search_pattern(pattern: &str) -> bool {
        pattern.chars().count() >= SEARCH_MIN_PATTERN_LEN
    }

    pub fn search_media(&self, title: &str) -> MediaSearchAggregate {
        let mut res = MediaSearchAggregate::default();
        if !Self::validate_search_pattern(title) {
            return res;
        }
        let Some(core) = self.core() else { return res };
        let found =
            log_err(core.db.with_conn(|conn| media::search(conn, title))).unwrap_or_default();
        for m in found {
            match m.sub_type {
                MediaSubType::AlbumTrack => res.tracks.push(m),
                MediaSubType::Movie => res.movies.push(m),
                MediaSubType::ShowEpisode => res.episodes.push(m),
                MediaSubType::Unknown => res.others.push(m),
            }
        }
        res
    }

    pub fn search_albums(&self, pattern: &str) -> Vec<Album> {
        if !Self::validate_search_pattern(pattern) {
            return Vec::new();
        }
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| album::search(conn, pattern))).unwrap_or_default()
    }

    pub fn search_artists(&self, pattern: &str) -> Vec<Artist> {
        if !Self::validate_search_pattern(pattern) {
            return Vec::new();
        }
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| artist::search(conn, pattern))).unwrap_or_default()
    }

    pub fn search_genre(&self, pattern: &str) -> Vec<Genre> {
        if !Self::validate_search_pattern(pattern) {
            return Vec::new();
        }
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| genre::search(conn, pattern))).unwrap_or_default()
    }

    pub fn search_playlists(&self, pattern: &str) -> Vec<Playlist> {
        if !Self::validate_search_pattern(pattern) {
            return Vec::new();
        }
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| playlist::search(conn, pattern))).unwrap_or_default()
    }

    pub fn search(&self, pattern: &str) -> SearchAggregate {
        SearchAggregate {
            albums: self.search_albums(pattern),
            artists: self.search_artists(pattern),
            genres: self.search_genre(pattern),
            media: self.search_media(pattern),
            playlists: self.search_playlists(pattern),
        }
    }

    // ----- Discovery control -----

    /// Accepts a local path or a file:// MRL.
    fn normalize_entry_point(entry_point: &str) -> String {
        match mrl::scheme(entry_point) {
            Some(_) => mrl::normalize(entry_point),
            None => mrl::from_path(Path::new(entry_point)),
        }
    }

    pub fn discover(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.discover(&Self::normalize_entry_point(entry_point));
        }
    }

    pub fn reload(&self) {
        if let Some(worker) = &self.discoverer {
            worker.reload_all();
        }
    }

    pub fn reload_entry_point(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.reload(&Self::normalize_entry_point(entry_point));
        }
    }

    pub fn remove_entry_point(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.remove(&Self::normalize_entry_point(entry_point));
        }
    }

    pub fn ban_folder(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.ban(&Self::normalize_entry_point(entry_point));
        }
    }

    pub fn unban_folder(&self, entry_point: &str) {
        if let Some(worker) = &self.discoverer {
            worker.unban(&Self::normalize_entry_point(entry_point));
        }
    }

    pub fn entry_points(&self) -> Vec<Folder> {
        let Some(core) = self.core() else {
            return Vec::new();
        };
        log_err(core.db.with_conn(|conn| folder::entry_points(conn))).unwrap_or_default()
    }

    pub fn folder(&self, entry_point: &str) -> Option<Folder> {
        let core = self.core()?;
        log_err(folder::from_mrl(
            core,
            &mrl::with_trailing_slash(&Self::normalize_entry_point(entry_point)),
            BannedType::Any,
        ))?
    }

    // ----- Background control -----

    pub fn pause_background_operations(&self) {
        if let Some(parser) = &self.parser {
            parser.pause();
        }
    }

    pub fn resume_background_operations(&self) {
        if let Some(parser) = &self.parser {
            parser.resume();
        }
    }

    /// Reset retry budgets and re-enqueue whatever is still unparsed.
    pub fn force_parser_retry(&self) -> bool {
        let Some(core) = self.core() else { return false };
        let res = core.db.with_conn(|conn| task::reset_retry_count(conn));
        if let Err(e) = res {
            log::error!("Failed to force parser retry: {}", e);
            return false;
        }
        if let Some(parser) = &self.parser {
            if let Err(e) = parser.restore_tasks() {
                log::error!("Failed to restore tasks: {}", e);
                return false;
            }
        }
        true
    }

    /// Wipe every derived table and reparse the whole catalog.
    pub fn force_rescan(&self) -> bool {
        let Some(core) = self.core() else { return false };
        if let Some(parser) = &self.parser {
            parser.pause();
            parser.flush();
        }
        let res = crate::db::migrations::force_rescan(&core.db);
        core.caches.clear_all();
        if let Some(parser) = &self.parser {
            if let Err(e) = parser.restore_tasks() {
                log::error!("Failed to re-enqueue tasks after rescan: {}", e);
            }
            parser.resume();
        }
        match res {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to force rescan: {}", e);
                false
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.core().map(|core| core.is_idle()).unwrap_or(true)
    }

    pub fn clear_cache(&self) {
        if let Some(core) = self.core() {
            core.caches.clear_all();
        }
    }

    // ----- Devices -----

    /// Sync device rows with the lister's current snapshot.
    pub fn refresh_devices(&self) {
        let Some(core) = self.core() else { return };
        let _guard = self.device_lock.lock().unwrap();
        core.devices.refresh(self.device_lister.as_ref());
        let devices = log_err(core.db.with_conn(|conn| device::all(conn))).unwrap_or_default();
        for d in devices {
            let fs_present = core.devices.is_present(&d.uuid);
            if d.is_present != fs_present {
                log::info!(
                    "Device {} changed presence state: {} -> {}",
                    d.uuid,
                    d.is_present,
                    fs_present
                );
                let _ = log_err(core.db.with_conn(|conn| device::set_present(conn, d.id, fs_present)));
            }
        }
        core.caches.clear_all();
    }

    /// Host-pushed plug event. Presence flips atomically with respect to
    /// ongoing discovery.
    pub fn on_device_plugged(&self, uuid: &str, mountpoint: &Path, is_removable: bool) {
        let Some(core) = self.core() else { return };
        let _guard = self.device_lock.lock().unwrap();
        core.devices.register(uuid, mountpoint.to_path_buf(), is_removable);
        let res = core.db.with_conn(|conn| {
            if let Some(d) = device::by_uuid(conn, uuid)? {
                device::set_present(conn, d.id, true)?;
            }
            Ok(())
        });
        if let Err(e) = res {
            log::error!("Failed to flag device {} present: {}", uuid, e);
        }
        core.caches.clear_all();
    }

    pub fn on_device_unplugged(&self, uuid: &str) {
        let Some(core) = self.core() else { return };
        let _guard = self.device_lock.lock().unwrap();
        core.devices.unregister_mountpoint(uuid);
        let res = core.db.with_conn(|conn| {
            if let Some(d) = device::by_uuid(conn, uuid)? {
                device::set_present(conn, d.id, false)?;
            }
            Ok(())
        });
        if let Err(e) = res {
            log::error!("Failed to flag device {} absent: {}", uuid, e);
        }
        core.caches.clear_all();
    }
}

impl Drop for MediaLibrary {
    fn drop(&mut self) {
        // Stop the writers before tearing down the notifier
        if let Some(mut discoverer) = self.discoverer.take() {
            discoverer.stop();
        }
        if let Some(parser) = self.parser.take() {
            parser.stop();
        }
        if let Some(mut notifier) = self.notifier.take() {
            notifier.stop();
        }
        if let Some(core) = self.core.take() {
            core.caches.clear_all();
        }
    }
}

/// Deletion hooks evict the cache; rows with host-facing callbacks also
/// notify removal. Updates evict so the next fetch re-reads the row.
fn register_entity_hooks(core: &Arc<Core>) {
    fn hook(
        core: &Arc<Core>,
        table: &str,
        evict: impl Fn(&Core, i64) + Send + Sync + 'static,
        notify: Option<Entity>,
    ) {
        let weak = Arc::downgrade(core);
        core.db.register_hook(
            table,
            Box::new(move |reason, rowid| {
                let Some(core) = weak.upgrade() else { return };
                match reason {
                    HookReason::Update => evict(&core, rowid),
                    HookReason::Delete => {
                        evict(&core, rowid);
                        if let Some(entity) = notify {
                            core.notifier.notify(entity, Change::Removed, rowid);
                        }
                    }
                    HookReason::Insert => {}
                }
            }),
        );
    }

    hook(core, "media", |c, id| c.caches.media.evict(id), Some(Entity::Media));
    hook(core, "artists", |c, id| c.caches.artist.evict(id), Some(Entity::Artist));
    hook(core, "albums", |c, id| c.caches.album.evict(id), Some(Entity::Album));
    hook(
        core,
        "album_tracks",
        |c, id| c.caches.album_track.evict(id),
        Some(Entity::AlbumTrack),
    );
    hook(
        core,
        "playlists",
        |c, id| c.caches.playlist.evict(id),
        Some(Entity::Playlist),
    );
    hook(core, "folders", |c, id| c.caches.folder.evict(id), None);
    hook(core, "files", |c, id| c.caches.file.evict(id), None);
    hook(core, "genres", |c, id| c.caches.genre.evict(id), None);
    hook(core, "labels", |c, id| c.caches.label.evict(id), None);
    hook(core, "shows", |c, id| c.caches.show.evict(id), None);
    hook(
        core,
        "show_episodes",
        |c, id| c.caches.show_episode.evict(id),
        None,
    );
    hook(core, "movies", |c, id| c.caches.movie.evict(id), None);
}

/// Log-and-discard error adapter for facade methods.
fn log_err<T>(res: Result<T>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            log::error!("{}", e);
            None
        }
    }
}
