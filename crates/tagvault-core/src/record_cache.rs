//! Bounded cache of parsed records.

use crate::config::CacheDefaults;
use crate::model::MediaRecord;
use indexmap::IndexMap;

/// Insertion-ordered record cache with oldest-first eviction.
///
/// Reads do not refresh an entry's position, and re-inserting a present
/// hash replaces the value in place.
#[derive(Debug, Clone)]
pub struct RecordCache {
    entries: IndexMap<String, MediaRecord>,
    capacity: usize,
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new(CacheDefaults::RECORD_CACHE_CAPACITY)
    }
}

impl RecordCache {
    /// A cache holding at most `capacity` records (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, hash: &str) -> Option<&MediaRecord> {
        self.entries.get(hash)
    }

    /// Insert a record, evicting the oldest entries beyond capacity.
    /// Returns the hashes that were evicted.
    pub fn insert(&mut self, hash: impl Into<String>, record: MediaRecord) -> Vec<String> {
        self.entries.insert(hash.into(), record);

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.entries.shift_remove_index(0) {
                Some((hash, _)) => evicted.push(hash),
                None => break,
            }
        }
        evicted
    }

    /// Drop the entry for `hash`, if any.
    pub fn invalidate(&mut self, hash: &str) -> bool {
        self.entries.shift_remove(hash).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
