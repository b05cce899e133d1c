//! Filesystem tier: the source of truth for every record.

mod fs;

pub use fs::{FileSystemStore, RecordStore};
