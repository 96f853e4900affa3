// medialib - embeddable media discovery, parsing and cataloging engine.
//
// The host hands over a database path, a thumbnail directory and a callback
// sink, then points the library at entry points to index. Discovery crawls
// the filesystem into persistent scan tasks; the parser drives each task
// through metadata extraction, tag analysis and thumbnailing; the catalog
// exposes the resulting relational model of media, albums, artists, shows
// and playlists.

pub mod cache;
pub mod callbacks;
pub mod catalog;
pub mod constants;
pub(crate) mod core;
pub mod db;
pub(crate) mod discoverer;
pub mod error;
pub mod fs;
pub mod library;
pub mod mrl;
pub(crate) mod notifier;
pub(crate) mod parser;
pub(crate) mod probe;
pub(crate) mod thumbnail;
pub mod tools;

#[cfg(test)]
mod tests;

pub use callbacks::{MediaLibraryCb, NoopCb};
pub use catalog::album::Album;
pub use catalog::album_track::AlbumTrack;
pub use catalog::artist::Artist;
pub use catalog::device::Device;
pub use catalog::file::{File, FileType};
pub use catalog::folder::Folder;
pub use catalog::genre::Genre;
pub use catalog::history::HistoryEntry;
pub use catalog::label::Label;
pub use catalog::media::{Media, MediaSubType, MediaType};
pub use catalog::movie::Movie;
pub use catalog::playlist::Playlist;
pub use catalog::show::{Show, ShowEpisode};
pub use catalog::track::{AudioTrack, VideoTrack};
pub use catalog::SortingCriteria;
pub use error::{MediaLibError, Result};
pub use fs::{DeviceInfo, DeviceLister};
pub use library::{InitResult, MediaLibrary, MediaSearchAggregate, SearchAggregate};
