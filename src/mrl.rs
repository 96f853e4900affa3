// MRL handling.
//
// Every MRL stored in the database is percent-encoded with one canonical
// encoder: RFC 3986 unreserved characters plus '/' pass through, everything
// else is escaped. Matching always compares encoded forms bit for bit.

use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{MediaLibError, Result};

pub const FILE_SCHEME: &str = "file://";

/// Everything but unreserved (ALPHA / DIGIT / "-" / "." / "_" / "~") and '/'.
const MRL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Percent-encode a raw path or path fragment.
pub fn encode(raw: &str) -> String {
    utf8_percent_encode(raw, MRL_ESCAPE).to_string()
}

/// Decode a percent-encoded MRL or fragment.
pub fn decode(encoded: &str) -> String {
    percent_decode_str(encoded).decode_utf8_lossy().into_owned()
}

/// Canonicalize an MRL or raw fragment: decode then re-encode everything
/// after the scheme. Idempotent; every stored MRL goes through this.
pub fn normalize(mrl: &str) -> String {
    match mrl.split_once("://") {
        Some((scheme, rest)) => format!("{scheme}://{}", encode(&decode(rest))),
        None => encode(&decode(mrl)),
    }
}

/// Build a `file://` MRL from a local filesystem path.
pub fn from_path(path: &Path) -> String {
    format!("{}{}", FILE_SCHEME, encode(&path.to_string_lossy()))
}

/// Resolve a `file://` MRL back to a local path.
pub fn to_path(mrl: &str) -> Result<PathBuf> {
    let rest = mrl
        .strip_prefix(FILE_SCHEME)
        .ok_or_else(|| MediaLibError::NotSupported(format!("unsupported scheme in {mrl}")))?;
    Ok(PathBuf::from(decode(rest)))
}

/// The scheme of an MRL ("file", "smb", ...), or None when it has none.
pub fn scheme(mrl: &str) -> Option<&str> {
    mrl.split_once("://").map(|(s, _)| s)
}

/// Everything up to and including the last '/'.
pub fn directory(mrl: &str) -> String {
    match mrl.rfind('/') {
        Some(idx) => mrl[..=idx].to_string(),
        None => String::new(),
    }
}

/// Everything after the last '/'.
pub fn file_name(mrl: &str) -> String {
    match mrl.rfind('/') {
        Some(idx) => mrl[idx + 1..].to_string(),
        None => mrl.to_string(),
    }
}

/// The decoded file name, for display titles.
pub fn decoded_file_name(mrl: &str) -> String {
    decode(&file_name(mrl))
}

/// Ensure a directory MRL carries its trailing slash.
pub fn with_trailing_slash(mrl: &str) -> String {
    if mrl.ends_with('/') {
        mrl.to_string()
    } else {
        format!("{mrl}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_passes_unreserved_and_slash() {
        assert_eq!(encode("/a/b/c.mp3"), "/a/b/c.mp3");
        assert_eq!(encode("/a-b_c.~/d"), "/a-b_c.~/d");
    }

    #[test]
    fn test_encode_escapes_reserved() {
        assert_eq!(encode("/a b/c#1.mp3"), "/a%20b/c%231.mp3");
        assert_eq!(encode("100%"), "100%25");
    }

    #[test]
    fn test_decode_then_encode_is_idempotent() {
        for raw in ["/plain/path.mp3", "/with space/été.flac", "/q?a=1&b=2"] {
            let mrl = encode(raw);
            assert_eq!(encode(&decode(&mrl)), mrl);
        }
    }

    #[test]
    fn test_normalize_preserves_the_scheme() {
        assert_eq!(
            normalize("file:///a dir/b.mp3"),
            "file:///a%20dir/b.mp3"
        );
        assert_eq!(
            normalize("smb://host/share/x y"),
            "smb://host/share/x%20y"
        );
        // Already-canonical input round-trips unchanged
        let canonical = normalize("http://radio.example/str eam");
        assert_eq!(normalize(&canonical), canonical);
    }

    #[test]
    fn test_path_round_trip() {
        let path = Path::new("/mnt/music/artist name/01 - tïtle.mp3");
        let mrl = from_path(path);
        assert!(mrl.starts_with(FILE_SCHEME));
        assert_eq!(to_path(&mrl).unwrap(), path);
    }

    #[test]
    fn test_directory_and_file_name() {
        let mrl = "file:///a/b/c.mp3";
        assert_eq!(directory(mrl), "file:///a/b/");
        assert_eq!(file_name(mrl), "c.mp3");
        assert_eq!(file_name("noslash"), "noslash");
    }

    #[test]
    fn test_scheme() {
        assert_eq!(scheme("file:///a"), Some("file"));
        assert_eq!(scheme("smb://host/share"), Some("smb"));
        assert_eq!(scheme("/a/b"), None);
    }

    #[test]
    fn test_rejects_foreign_scheme_paths() {
        assert!(to_path("http://example.com/x.mp3").is_err());
    }
}
