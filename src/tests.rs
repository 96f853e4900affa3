// End-to-end scenarios: trigger network, crash recovery, discovery over a
// real filesystem tree, removable-device lifecycle.

use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::params;
use tempfile::TempDir;

use crate::callbacks::{MediaLibraryCb, NoopCb};
use crate::catalog::file::{FileType, NewFile};
use crate::catalog::media::MediaType;
use crate::catalog::task::{
    STEP_COMPLETED, STEP_METADATA_ANALYSIS, STEP_METADATA_EXTRACTION,
};
use crate::catalog::{album, album_track, artist, device, file, folder, media, task};
use crate::core::Core;
use crate::db::{migrations, Db};
use crate::fs::{DeviceInfo, DeviceLister};
use crate::library::{InitResult, MediaLibrary};
use crate::notifier::Notifier;
use crate::parser::service::{ParserService, Status};
use crate::parser::Parser;

fn prepared_db() -> Db {
    let db = Db::open(":memory:").unwrap();
    migrations::prepare(&db).unwrap();
    db
}

/// Core with a live notifier, for components that need the full context.
struct TestCtx {
    core: Arc<Core>,
    _notifier: Notifier,
    _thumb_dir: TempDir,
}

fn test_core() -> TestCtx {
    let db = prepared_db();
    let notifier = Notifier::start(Arc::new(NoopCb));
    let thumb_dir = TempDir::new().unwrap();
    let core = Arc::new(Core::new(
        db,
        notifier.handle(),
        Arc::new(NoopCb),
        thumb_dir.path().to_path_buf(),
    ));
    TestCtx {
        core,
        _notifier: notifier,
        _thumb_dir: thumb_dir,
    }
}

/// Seed one device -> folder -> file -> media -> album track chain.
fn seed_catalog_chain(db: &Db, removable: bool) -> (i64, i64, i64, i64, i64) {
    db.transaction(|conn| {
        let device_id = device::create(conn, "dev-uuid-1", "file://", removable)?;
        let folder_id = folder::create(conn, "music/", None, device_id, removable)?;
        let media_id = media::create(conn, MediaType::Audio, "song", "song.mp3")?;
        let file_id = file::create_from_media(
            conn,
            media_id,
            &NewFile {
                mrl: "song.mp3",
                file_type: FileType::Main,
                folder_id,
                last_modification_date: 1,
                size: 10,
                is_removable: removable,
            },
        )?;
        let album_id = album::create(conn, "The Album", None)?;
        album::set_album_artist(conn, album_id, 1)?;
        album_track::create(conn, media_id, album_id, 1, None, Some(1), Some(1), 1000)?;
        Ok((device_id, folder_id, file_id, media_id, album_id))
    })
    .unwrap()
}

fn query_one<T: rusqlite::types::FromSql>(db: &Db, sql: &str) -> T {
    db.with_conn(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
        .unwrap()
}

// ---------------------------------------------------------------
// Scenario: unplugging a removable device flips presence without
// deleting anything; replugging restores it.
// ---------------------------------------------------------------
#[test]
fn test_unplug_preserves_referential_integrity() {
    let db = prepared_db();
    let (device_id, ..) = seed_catalog_chain(&db, true);

    db.with_conn(|conn| device::set_present(conn, device_id, false))
        .unwrap();

    for table in ["folders", "files", "media", "album_tracks", "albums"] {
        let count: i64 = query_one(&db, &format!("SELECT COUNT(*) FROM {table}"));
        assert_eq!(count, 1, "{table} row must survive the unplug");
        let present: i64 = query_one(&db, &format!("SELECT is_present FROM {table}"));
        assert_eq!(present, 0, "{table} must not be present after unplug");
    }
    // The album artist chain reached the artist too
    let artist_present: i64 = query_one(&db, "SELECT is_present FROM artists WHERE id = 1");
    assert_eq!(artist_present, 0);

    db.with_conn(|conn| device::set_present(conn, device_id, true))
        .unwrap();
    for table in ["folders", "files", "media", "album_tracks", "albums"] {
        let present: i64 = query_one(&db, &format!("SELECT is_present FROM {table}"));
        assert_eq!(present, 1, "{table} must be present again after replug");
    }
}

// ---------------------------------------------------------------
// Scenario: a guest credit (track artist owning no album) follows
// track presence; the album path alone never reaches them.
// ---------------------------------------------------------------
#[test]
fn test_guest_track_artist_presence_follows_tracks() {
    let db = prepared_db();
    let (device_id, guest_id, owner_id) = db
        .transaction(|conn| {
            let device_id = device::create(conn, "dev-uuid-2", "file://", true)?;
            let folder_id = folder::create(conn, "music/", None, device_id, true)?;
            let media_id = media::create(conn, MediaType::Audio, "duet", "duet.mp3")?;
            file::create_from_media(
                conn,
                media_id,
                &NewFile {
                    mrl: "duet.mp3",
                    file_type: FileType::Main,
                    folder_id,
                    last_modification_date: 1,
                    size: 10,
                    is_removable: true,
                },
            )?;
            let owner = artist::get_or_create(conn, "Owner")?;
            let guest = artist::get_or_create(conn, "Guest")?;
            let album_id = album::create(conn, "Duets", None)?;
            album::set_album_artist(conn, album_id, owner.id)?;
            // The credited artist owns no album of their own
            album_track::create(conn, media_id, album_id, guest.id, None, None, None, 0)?;
            Ok((device_id, guest.id, owner.id))
        })
        .unwrap();

    let presence = |db: &Db, id: i64| -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT is_present FROM artists WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?)
        })
        .unwrap()
    };

    db.with_conn(|conn| device::set_present(conn, device_id, false))
        .unwrap();
    assert_eq!(presence(&db, guest_id), 0, "guest must follow track presence");
    assert_eq!(presence(&db, owner_id), 0, "owner must follow album presence");

    db.with_conn(|conn| device::set_present(conn, device_id, true))
        .unwrap();
    assert_eq!(presence(&db, guest_id), 1);
    assert_eq!(presence(&db, owner_id), 1);
}

// ---------------------------------------------------------------
// Scenario: deleting the last album track deletes the album.
// ---------------------------------------------------------------
#[test]
fn test_album_auto_deletion() {
    let db = prepared_db();
    db.transaction(|conn| {
        let media_id = media::create(conn, MediaType::Audio, "t", "t.mp3")?;
        let artist_row = artist::get_or_create(conn, "Someone")?;
        let album_id = album::create(conn, "Solo", None)?;
        album::set_album_artist(conn, album_id, artist_row.id)?;
        album_track::create(conn, media_id, album_id, artist_row.id, None, None, None, 0)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(query_one::<i64>(&db, "SELECT COUNT(*) FROM albums"), 1);
    assert_eq!(
        query_one::<i64>(&db, "SELECT nb_tracks FROM albums"),
        1
    );

    db.with_conn(|conn| {
        let track = album_track::from_media(conn, 1)?.unwrap();
        album_track::delete(conn, track.id)
    })
    .unwrap();

    assert_eq!(query_one::<i64>(&db, "SELECT COUNT(*) FROM albums"), 0);
    // The one-track artist went with it
    assert_eq!(
        query_one::<i64>(&db, "SELECT COUNT(*) FROM artists WHERE name = 'Someone'"),
        0
    );
}

#[test]
fn test_default_artists_survive_track_deletion() {
    let db = prepared_db();
    db.transaction(|conn| {
        let media_id = media::create(conn, MediaType::Audio, "t", "t.mp3")?;
        let album_id = album::create(conn, "Unknowns", None)?;
        album_track::create(conn, media_id, album_id, 1, None, None, None, 0)?;
        Ok(())
    })
    .unwrap();
    db.with_conn(|conn| {
        let track = album_track::from_media(conn, 1)?.unwrap();
        album_track::delete(conn, track.id)
    })
    .unwrap();
    assert_eq!(
        query_one::<i64>(&db, "SELECT COUNT(*) FROM artists WHERE id <= 2"),
        2
    );
}

// ---------------------------------------------------------------
// Scenario: deleting the last file of a media deletes the media.
// ---------------------------------------------------------------
#[test]
fn test_cascade_file_deletion() {
    let db = prepared_db();
    let (.., file_id, _media_id, _album) = seed_catalog_chain(&db, false);
    db.with_conn(|conn| file::delete(conn, file_id)).unwrap();
    assert_eq!(query_one::<i64>(&db, "SELECT COUNT(*) FROM media"), 0);
    // Trigger chain went on to empty the musical model too
    assert_eq!(query_one::<i64>(&db, "SELECT COUNT(*) FROM album_tracks"), 0);
    assert_eq!(query_one::<i64>(&db, "SELECT COUNT(*) FROM albums"), 0);
}

// ---------------------------------------------------------------
// Scenario: a task interrupted after metadata extraction resumes at
// the analyzer, not at the extractor.
// ---------------------------------------------------------------
#[test]
fn test_parser_resumes_from_recorded_step() {
    let ctx = test_core();
    ctx.core
        .db
        .transaction(|conn| {
            let device_id = device::create(conn, "d", "file://", false)?;
            let folder_id = folder::create(conn, "file:///m/", None, device_id, false)?;
            let media_id = media::create(conn, MediaType::Audio, "s", "s.mp3")?;
            let file_id = file::create_from_media(
                conn,
                media_id,
                &NewFile {
                    mrl: "file:///m/s.mp3",
                    file_type: FileType::Main,
                    folder_id,
                    last_modification_date: 1,
                    size: 10,
                    is_removable: false,
                },
            )?;
            let t = task::create(conn, "file:///m/s.mp3", folder_id, None)?;
            task::set_file_id(conn, t.id, file_id)?;
            task::save_step(conn, t.id, STEP_METADATA_EXTRACTION)?;
            Ok(())
        })
        .unwrap();

    let parser = Parser::new(Arc::clone(&ctx.core));
    // Restore without spawning workers so the queues stay inspectable
    parser.restore_tasks().unwrap();
    assert_eq!(parser.queue_lengths(), vec![0, 1, 0]);
}

#[test]
fn test_completed_tasks_are_not_restored() {
    let ctx = test_core();
    ctx.core
        .db
        .transaction(|conn| {
            let device_id = device::create(conn, "d", "file://", false)?;
            let folder_id = folder::create(conn, "file:///m/", None, device_id, false)?;
            let t = task::create(conn, "file:///m/done.mp3", folder_id, None)?;
            task::save_step(conn, t.id, STEP_COMPLETED)?;
            let parked = task::create(conn, "file:///m/parked.mp3", folder_id, None)?;
            conn.execute(
                "UPDATE tasks SET retry_count = 3 WHERE id = ?1",
                params![parked.id],
            )?;
            Ok(())
        })
        .unwrap();
    let parser = Parser::new(Arc::clone(&ctx.core));
    parser.restore_tasks().unwrap();
    assert_eq!(parser.queue_lengths(), vec![0, 0, 0]);
}

// ---------------------------------------------------------------
// Scenario: a decoder that reports no video stream for an Unknown
// media reclassifies it as Audio; the step completes with no image.
// ---------------------------------------------------------------
#[test]
fn test_thumbnailer_reclassifies_unknown_media_as_audio() {
    let ctx = test_core();
    let (media_id, file_id, task_id) = ctx
        .core
        .db
        .transaction(|conn| {
            let device_id = device::create(conn, "d", "file://", false)?;
            let folder_id = folder::create(conn, "file:///m/", None, device_id, false)?;
            let media_id = media::create(conn, MediaType::Unknown, "u", "u.wav")?;
            let file_id = file::create_from_media(
                conn,
                media_id,
                &NewFile {
                    mrl: "file:///m/u.wav",
                    file_type: FileType::Main,
                    folder_id,
                    last_modification_date: 1,
                    size: 10,
                    is_removable: false,
                },
            )?;
            let t = task::create(conn, "file:///m/u.wav", folder_id, None)?;
            task::set_file_id(conn, t.id, file_id)?;
            task::save_step(conn, t.id, STEP_METADATA_EXTRACTION | STEP_METADATA_ANALYSIS)?;
            Ok((media_id, file_id, t.id))
        })
        .unwrap();

    let mut t = ctx
        .core
        .db
        .with_conn(|conn| task::get(conn, task_id))
        .unwrap()
        .unwrap();
    t.file_id = Some(file_id);
    t.media_id = Some(media_id);
    t.probe = Some(crate::probe::MediaProbe {
        duration_ms: Some(1000),
        audio_streams: vec![Default::default()],
        ..Default::default()
    });

    let service = crate::parser::thumbnailer::Thumbnailer;
    let status = service.run(&ctx.core, &mut t);
    assert_eq!(status, Status::Success);

    let row = ctx
        .core
        .db
        .with_conn(|conn| media::get(conn, media_id))
        .unwrap()
        .unwrap();
    assert_eq!(row.media_type, MediaType::Audio);
    assert!(row.thumbnail.is_none());

    let saved = ctx
        .core
        .db
        .with_conn(|conn| task::get(conn, task_id))
        .unwrap()
        .unwrap();
    assert!(saved.is_completed());
    // No image file was written
    assert_eq!(std::fs::read_dir(&ctx.core.thumbnail_dir).unwrap().count(), 0);
}

// ---------------------------------------------------------------
// Scenario: queries run while another thread hammers the catalog.
// ---------------------------------------------------------------
#[test]
fn test_concurrent_inserts_and_search() {
    let db = Arc::new(prepared_db());
    let writer_db = Arc::clone(&db);
    let writer = std::thread::spawn(move || {
        for i in 0..300 {
            writer_db
                .with_conn(|conn| {
                    media::create(conn, MediaType::Video, &format!("otter clip {i}"), "o.mkv")
                        .map(|_| ())
                })
                .unwrap();
        }
    });

    let mut last = Vec::new();
    for _ in 0..50 {
        last = db.with_conn(|conn| media::search(conn, "otter")).unwrap();
        let mut ids: Vec<i64> = last.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), last.len(), "search must not return duplicates");
    }
    writer.join().unwrap();
    last = db.with_conn(|conn| media::search(conn, "otter")).unwrap();
    assert_eq!(last.len(), 300);
}

// ---------------------------------------------------------------
// Facade-level tests over a real filesystem tree
// ---------------------------------------------------------------

struct MockLister {
    devices: Mutex<Vec<DeviceInfo>>,
}

impl DeviceLister for MockLister {
    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct DiscoveryWatcher {
    tx: Sender<String>,
}

impl MediaLibraryCb for DiscoveryWatcher {
    fn on_discovery_completed(&self, entry_point: &str) {
        let _ = self.tx.send(entry_point.to_string());
    }
    fn on_reload_completed(&self, entry_point: &str) {
        let _ = self.tx.send(entry_point.to_string());
    }
    fn on_entry_point_banned(&self, entry_point: &str, _success: bool) {
        let _ = self.tx.send(format!("ban:{entry_point}"));
    }
}

fn library_over(
    tree: &TempDir,
    removable: bool,
) -> (MediaLibrary, std::sync::mpsc::Receiver<String>, PathBuf) {
    let (tx, rx) = channel();
    let db_path = tree.path().join("test.db");
    let thumb_dir = tree.path().join("thumbs");
    let mount = tree.path().join("mnt");
    std::fs::create_dir_all(&mount).unwrap();

    let mut ml = MediaLibrary::new();
    ml.set_device_lister(Arc::new(MockLister {
        devices: Mutex::new(vec![DeviceInfo {
            uuid: "test-device".into(),
            mountpoint: mount.clone(),
            is_removable: removable,
        }]),
    }));
    let res = ml.initialize(
        db_path.to_str().unwrap(),
        &thumb_dir,
        Some(Arc::new(DiscoveryWatcher { tx })),
    );
    assert_eq!(res, InitResult::Success);
    assert!(ml.start());
    (ml, rx, mount)
}

fn open_raw(tree: &TempDir) -> rusqlite::Connection {
    rusqlite::Connection::open(tree.path().join("test.db")).unwrap()
}

#[test]
fn test_initialize_twice_reports_already_initialized() {
    let tree = TempDir::new().unwrap();
    let db_path = tree.path().join("t.db");
    let mut ml = MediaLibrary::new();
    assert_eq!(
        ml.initialize(db_path.to_str().unwrap(), &tree.path().join("th"), None),
        InitResult::Success
    );
    assert_eq!(
        ml.initialize(db_path.to_str().unwrap(), &tree.path().join("th"), None),
        InitResult::AlreadyInitialized
    );
}

#[test]
fn test_discovery_creates_tasks_and_is_idempotent() {
    let tree = TempDir::new().unwrap();
    let (ml, rx, mount) = library_over(&tree, false);

    let music = mount.join("music");
    std::fs::create_dir_all(music.join("rock")).unwrap();
    std::fs::write(music.join("one.mp3"), b"x").unwrap();
    std::fs::write(music.join("rock").join("two.flac"), b"x").unwrap();
    std::fs::write(music.join("notes.txt"), b"x").unwrap();
    std::fs::write(music.join(".hidden.mp3"), b"x").unwrap();

    ml.discover(music.to_str().unwrap());
    rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let raw = open_raw(&tree);
    let tasks: i64 = raw
        .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
        .unwrap();
    assert_eq!(tasks, 2, "only whitelisted, visible files become tasks");
    let folders: i64 = raw
        .query_row("SELECT COUNT(*) FROM folders", [], |r| r.get(0))
        .unwrap();
    assert_eq!(folders, 2);

    // A second pass with no filesystem changes schedules nothing new
    ml.discover(music.to_str().unwrap());
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let tasks_again: i64 = raw
        .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
        .unwrap();
    assert_eq!(tasks_again, 2);
    let folders_again: i64 = raw
        .query_row("SELECT COUNT(*) FROM folders", [], |r| r.get(0))
        .unwrap();
    assert_eq!(folders_again, 2);

    let entry_points = ml.entry_points();
    assert_eq!(entry_points.len(), 1);
}

#[test]
fn test_banned_folder_is_not_crawled() {
    let tree = TempDir::new().unwrap();
    let (ml, rx, mount) = library_over(&tree, false);

    let music = mount.join("music");
    std::fs::create_dir_all(music.join("bad")).unwrap();
    std::fs::write(music.join("keep.mp3"), b"x").unwrap();
    std::fs::write(music.join("bad").join("skip.mp3"), b"x").unwrap();

    ml.ban_folder(music.join("bad").to_str().unwrap());
    let banned = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(banned.starts_with("ban:"));

    ml.discover(music.to_str().unwrap());
    rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let raw = open_raw(&tree);
    let mrls: Vec<String> = raw
        .prepare("SELECT mrl FROM tasks")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<std::result::Result<_, _>>()
        .unwrap();
    assert_eq!(mrls.len(), 1);
    assert!(mrls[0].contains("keep.mp3"));
}

#[test]
fn test_unplug_and_replug_through_the_facade() {
    let tree = TempDir::new().unwrap();
    let (ml, rx, mount) = library_over(&tree, true);

    let music = mount.join("music");
    std::fs::create_dir_all(&music).unwrap();
    std::fs::write(music.join("song.mp3"), b"x").unwrap();

    ml.discover(music.to_str().unwrap());
    rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let raw = open_raw(&tree);
    let stored_path: String = raw
        .query_row("SELECT path FROM folders LIMIT 1", [], |r| r.get(0))
        .unwrap();
    assert!(
        !stored_path.contains("mnt"),
        "removable folder paths must be mountpoint-relative, got {stored_path}"
    );

    ml.on_device_unplugged("test-device");
    let present: i64 = raw
        .query_row("SELECT is_present FROM folders LIMIT 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(present, 0);
    let folders: i64 = raw
        .query_row("SELECT COUNT(*) FROM folders", [], |r| r.get(0))
        .unwrap();
    assert_eq!(folders, 1, "unplug must not delete rows");

    // Remount at a different location
    let new_mount = tree.path().join("mnt2");
    std::fs::create_dir_all(&new_mount).unwrap();
    ml.on_device_plugged("test-device", &new_mount, true);
    let present: i64 = raw
        .query_row("SELECT is_present FROM folders LIMIT 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(present, 1);
}

#[test]
fn test_search_rejects_short_patterns() {
    let tree = TempDir::new().unwrap();
    let db_path = tree.path().join("t.db");
    let mut ml = MediaLibrary::new();
    ml.initialize(db_path.to_str().unwrap(), &tree.path().join("th"), None);

    let agg = ml.search("ab");
    assert!(agg.albums.is_empty());
    assert!(agg.artists.is_empty());
    assert!(agg.genres.is_empty());
    assert!(agg.playlists.is_empty());
    assert!(agg.media.others.is_empty());
}

#[test]
fn test_playlist_ordering_through_the_facade() {
    let tree = TempDir::new().unwrap();
    let db_path = tree.path().join("t.db");
    let mut ml = MediaLibrary::new();
    ml.initialize(db_path.to_str().unwrap(), &tree.path().join("th"), None);

    let a = ml.add_external_media("file:///ext/a.mp3").unwrap();
    let b = ml.add_external_media("file:///ext/b.mp3").unwrap();
    let c = ml.add_external_media("file:///ext/c.mp3").unwrap();

    let pl = ml.create_playlist("mix").unwrap();
    assert!(ml.playlist_append(pl.id, a.id));
    assert!(ml.playlist_append(pl.id, b.id));
    assert!(ml.playlist_append(pl.id, c.id));

    let titles = |ml: &MediaLibrary| -> Vec<i64> {
        ml.playlist_media(pl.id).iter().map(|m| m.id).collect()
    };
    assert_eq!(titles(&ml), vec![a.id, b.id, c.id]);

    assert!(ml.playlist_move(pl.id, c.id, 0));
    assert_eq!(titles(&ml), vec![c.id, a.id, b.id]);

    assert!(ml.playlist_remove(pl.id, a.id));
    assert_eq!(titles(&ml), vec![c.id, b.id]);
}

#[test]
fn test_external_media_round_trip() {
    let tree = TempDir::new().unwrap();
    let db_path = tree.path().join("t.db");
    let mut ml = MediaLibrary::new();
    ml.initialize(db_path.to_str().unwrap(), &tree.path().join("th"), None);

    let added = ml.add_external_media("file:///somewhere/έξω track.mp3").unwrap();
    assert_eq!(added.media_type, MediaType::External);

    let found = ml
        .media_by_mrl("file:///somewhere/έξω track.mp3")
        .expect("external media must resolve by mrl");
    assert_eq!(found.id, added.id);

    // Duplicate registration is refused
    assert!(ml.add_external_media("file:///somewhere/έξω track.mp3").is_none());
}

#[test]
fn test_stream_history_via_facade() {
    let tree = TempDir::new().unwrap();
    let db_path = tree.path().join("t.db");
    let mut ml = MediaLibrary::new();
    ml.initialize(db_path.to_str().unwrap(), &tree.path().join("th"), None);

    for i in 0..120 {
        assert!(ml.add_to_stream_history(&format!("http://radio/{i}")));
    }
    let streams = ml.last_streams_played();
    assert_eq!(streams.len(), crate::constants::HISTORY_MAX_ENTRIES as usize);
    assert_eq!(streams[0].mrl, "http://radio/119");

    assert!(ml.clear_history());
    assert!(ml.last_streams_played().is_empty());
}
