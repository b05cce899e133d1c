//! Rebuildable SQLite projection of the record files.
//!
//! Nothing here is authoritative. [`IndexStore::rebuild_from`] drops every
//! table and re-projects each record found by the filesystem tier.

mod media_index;

pub use media_index::{IndexStore, RebuildReport};
