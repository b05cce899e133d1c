//! Crash-safe file persistence helpers.
//!
//! Record files are the source of truth for the whole library, so every
//! JSON write goes through a temp file, an fsync and a rename.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_bytes, atomic_write_json};
