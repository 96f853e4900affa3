// Catalog model: row-backed entities and their query helpers.
//
// Relations are stored as primary keys and resolved through the entity
// cache on demand; no entity owns another in memory. The database is the
// single source of truth.

pub mod album;
pub mod album_track;
pub mod artist;
pub mod device;
pub mod file;
pub mod folder;
pub mod genre;
pub mod history;
pub mod label;
pub mod media;
pub mod movie;
pub mod playlist;
pub mod show;
pub mod task;
pub mod track;

use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortingCriteria {
    Default,
    Alpha,
    Duration,
    InsertionDate,
    ReleaseDate,
    PlayCount,
}

/// Seconds since the epoch, the timestamp format stored in every table.
pub(crate) fn timestamp_now() -> i64 {
    Utc::now().timestamp()
}
