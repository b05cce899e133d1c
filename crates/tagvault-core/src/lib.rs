//! Tagvault Core - persistence for a tagged media-annotation library.
//!
//! A library is a directory of media files, each described by a JSON record
//! (name, caption, tags, relations, metadata). Storage is split in three
//! tiers: the record files under `images/` are authoritative, the SQLite
//! index is a rebuildable projection of them, and the JPEG previews under
//! `cache/` are regenerable from the media. Edits are staged in memory and
//! written through the tiers by an explicit commit.
//!
//! # Example
//!
//! ```rust,ignore
//! use tagvault_core::MediaLibrary;
//!
//! fn main() -> tagvault_core::Result<()> {
//!     let mut library = MediaLibrary::open("/path/to/library")?;
//!
//!     let hash = library.import_file("/photos/cat.png")?;
//!     let mut record = library.load(&hash).unwrap_or_default();
//!     record.add_tag("class", "cat");
//!     library.save(hash, record);
//!
//!     let report = library.commit_all();
//!     println!("Saved {} records", report.saved.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod hashing;
pub mod index;
pub mod library;
pub mod model;
pub mod persist;
pub mod preview;
pub mod record_cache;
pub mod staging;
pub mod store;
pub mod tag_index;

// Re-export commonly used types
pub use config::StoreConfig;
pub use error::{Result, VaultError};
pub use hashing::{compute_media_hash, compute_media_hash_with};
pub use index::{IndexStore, RebuildReport};
pub use library::{CommitReport, LibraryStats, MediaLibrary, PreviewReport};
pub use model::{MediaKind, MediaRecord, RecordKind, Tag};
pub use preview::PreviewCache;
pub use record_cache::RecordCache;
pub use staging::StagingArea;
pub use store::{FileSystemStore, RecordStore};
pub use tag_index::TagIndex;
