//! Uncommitted edits, held in memory until the next commit.
//!
//! A staged record fully replaces whatever is on disk for its hash; the two
//! are never merged. No I/O happens here.

use crate::model::MediaRecord;
use indexmap::{IndexMap, IndexSet};

/// Hashes listed per section in [`StagingArea::summary`].
const SUMMARY_LIMIT: usize = 10;

/// Pending record edits, removals and dirty flags.
#[derive(Debug, Default, Clone)]
pub struct StagingArea {
    records: IndexMap<String, MediaRecord>,
    removals: IndexSet<String>,
    project_modified: bool,
    library_modified: bool,
}

impl StagingArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `record` for `hash`, replacing any earlier staged version and
    /// cancelling a pending removal of the same hash.
    pub fn stage_record(&mut self, hash: impl Into<String>, record: MediaRecord) {
        let hash = hash.into();
        self.removals.shift_remove(&hash);
        self.records.insert(hash, record);
    }

    /// Stage a soft delete, dropping any staged edit of the same hash.
    pub fn stage_removal(&mut self, hash: impl Into<String>) {
        let hash = hash.into();
        self.records.shift_remove(&hash);
        self.removals.insert(hash);
    }

    pub fn mark_project_dirty(&mut self) {
        self.project_modified = true;
    }

    pub fn mark_library_dirty(&mut self) {
        self.library_modified = true;
    }

    pub fn is_project_dirty(&self) -> bool {
        self.project_modified
    }

    pub fn is_library_dirty(&self) -> bool {
        self.library_modified
    }

    pub fn has_changes(&self) -> bool {
        !self.records.is_empty()
            || !self.removals.is_empty()
            || self.project_modified
            || self.library_modified
    }

    /// Number of staged records plus staged removals.
    pub fn change_count(&self) -> usize {
        self.records.len() + self.removals.len()
    }

    pub fn get(&self, hash: &str) -> Option<&MediaRecord> {
        self.records.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.records.contains_key(hash)
    }

    pub fn is_removal_staged(&self, hash: &str) -> bool {
        self.removals.contains(hash)
    }

    /// Hashes with a staged record, in staging order.
    pub fn modified_hashes(&self) -> IndexSet<String> {
        self.records.keys().cloned().collect()
    }

    /// Hashes with a staged removal, in staging order.
    pub fn removed_hashes(&self) -> IndexSet<String> {
        self.removals.clone()
    }

    /// Move all staged records out, leaving removals and flags in place.
    pub fn take_records(&mut self) -> IndexMap<String, MediaRecord> {
        std::mem::take(&mut self.records)
    }

    /// Move all staged removals out, leaving records and flags in place.
    pub fn take_removals(&mut self) -> IndexSet<String> {
        std::mem::take(&mut self.removals)
    }

    pub fn clear_flags(&mut self) {
        self.project_modified = false;
        self.library_modified = false;
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.removals.clear();
        self.clear_flags();
    }

    /// Human-readable description of what a commit would write.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        if self.project_modified {
            lines.push("• Project structure modified".to_string());
        }
        if self.library_modified {
            lines.push("• Library structure modified".to_string());
        }
        push_section(&mut lines, "removed", self.removals.iter());
        push_section(&mut lines, "modified", self.records.keys());

        if lines.is_empty() {
            "No changes".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn push_section<'a>(lines: &mut Vec<String>, verb: &str, hashes: impl Iterator<Item = &'a String>) {
    let mut sorted: Vec<&String> = hashes.collect();
    if sorted.is_empty() {
        return;
    }
    sorted.sort();

    lines.push(format!("• {} record(s) {}:", sorted.len(), verb));
    for hash in sorted.iter().take(SUMMARY_LIMIT) {
        lines.push(format!("  - {}", hash));
    }
    if sorted.len() > SUMMARY_LIMIT {
        lines.push(format!("  ... and {} more", sorted.len() - SUMMARY_LIMIT));
    }
}
