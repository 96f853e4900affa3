// Media library constants

/// Current database model version. Bump when the schema changes and add a
/// migration step in db/migrations.rs.
pub const DB_MODEL_VERSION: u32 = 13;

// Storage
pub const DB_BUSY_RETRIES: u32 = 3;
pub const DB_BUSY_BACKOFF_MS: u64 = 50;
pub const MIGRATION_MAX_ATTEMPTS: u32 = 3;

// Parser
pub const TASK_MAX_RETRIES: i64 = 3;

// Thumbnails
pub const THUMBNAIL_WIDTH: u32 = 320;
pub const THUMBNAIL_HEIGHT: u32 = 200;
pub const THUMBNAIL_EXTENSION: &str = "jpg";
pub const THUMBNAIL_QUALITY: u32 = 85;
/// Where to extract the poster frame when the duration is known (1/4th in).
pub const THUMBNAIL_SEEK_RATIO: f64 = 0.25;
/// Fallback seek position when the duration is unknown.
pub const THUMBNAIL_FALLBACK_SEEK_RATIO: f64 = 0.4;
/// Hard deadline on a single frame extraction.
pub const THUMBNAIL_DEADLINE_SECS: u64 = 15;

// Probing
pub const PROBE_DEADLINE_SECS: u64 = 3;

// History
pub const HISTORY_MAX_ENTRIES: u32 = 100;

// Search
pub const SEARCH_MIN_PATTERN_LEN: usize = 3;

// Notifier
pub const NOTIFIER_DEBOUNCE_MS: u64 = 500;

// Default artists, seeded at schema creation and never auto-deleted.
pub const UNKNOWN_ARTIST_ID: i64 = 1;
pub const VARIOUS_ARTISTS_ID: i64 = 2;

/// Extensions the crawler probe will enqueue. MUST stay sorted: membership
/// is tested with a case-insensitive binary search.
pub const SUPPORTED_EXTENSIONS: [&str; 96] = [
    "3gp", "a52", "aac", "ac3", "aif", "aifc", "aiff", "alac", "amr",
    "amv", "aob", "ape", "asf", "asx", "avi", "b4s",
    "divx", "dts", "dv", "flac", "flv", "gxf", "ifo", "iso",
    "it", "itml", "m1v", "m2t", "m2ts", "m2v", "m3u", "m3u8",
    "m4a", "m4b", "m4p", "m4v", "mid", "mka", "mkv", "mlp",
    "mod", "mov", "mp1", "mp2", "mp3", "mp4", "mpc", "mpeg",
    "mpeg1", "mpeg2", "mpeg4", "mpg", "mts", "mxf", "nsv",
    "nuv", "oga", "ogg", "ogm", "ogv", "ogx", "oma", "opus",
    "pls", "ps", "qtl", "ram", "rec", "rm", "rmi", "rmvb",
    "s3m", "sdp", "spx", "tod", "trp", "ts", "tta", "vlc",
    "vob", "voc", "vqf", "vro", "w64", "wav", "wax", "webm",
    "wma", "wmv", "wmx", "wpl", "wv", "wvx", "xa", "xm", "xspf",
];

/// Extensions treated as playlist files rather than media.
pub const PLAYLIST_EXTENSIONS: [&str; 6] = ["asx", "b4s", "m3u", "m3u8", "pls", "xspf"];

/// Case-insensitive binary search over the sorted extension whitelist.
pub fn is_extension_supported(ext: &str) -> bool {
    let lower = ext.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS
        .binary_search_by(|probe| probe.cmp(&lower.as_str()))
        .is_ok()
}

pub fn is_playlist_extension(ext: &str) -> bool {
    let lower = ext.to_ascii_lowercase();
    PLAYLIST_EXTENSIONS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions_are_sorted() {
        let mut sorted = SUPPORTED_EXTENSIONS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.as_slice(), &SUPPORTED_EXTENSIONS[..]);
    }

    #[test]
    fn test_extension_lookup_is_case_insensitive() {
        assert!(is_extension_supported("mp3"));
        assert!(is_extension_supported("MP3"));
        assert!(is_extension_supported("Mkv"));
        assert!(!is_extension_supported("txt"));
        assert!(!is_extension_supported(""));
    }

    #[test]
    fn test_playlist_extensions() {
        assert!(is_playlist_extension("m3u"));
        assert!(is_playlist_extension("M3U8"));
        assert!(!is_playlist_extension("mp4"));
    }
}
