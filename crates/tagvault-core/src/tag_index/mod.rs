//! Session-wide set of known tags for search and autocomplete.
//!
//! The index is owned by the library session and fed incrementally as
//! records are staged. It is never authoritative: [`TagIndex::build_from`]
//! reconstructs it from whatever records the caller enumerates.

mod fuzzy;

pub use fuzzy::{similarity_ratio, EXACT_SCORE, MIN_FUZZY_RATIO, PREFIX_SCORE};

use crate::model::{MediaRecord, Tag};
use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Distinct `category:value` tags and `category:` prefixes.
///
/// Sorted projections are computed lazily on first read after a change.
#[derive(Debug, Default)]
pub struct TagIndex {
    tags: HashSet<String>,
    categories: HashSet<String>,
    sorted_tags: OnceCell<Vec<String>>,
    sorted_categories: OnceCell<Vec<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(&mut self, category: &str, value: &str) {
        let tag_changed = self.tags.insert(format!("{}:{}", category, value));
        let category_changed = self.categories.insert(format!("{}:", category));
        if tag_changed || category_changed {
            self.invalidate();
        }
    }

    pub fn add_tags<'a>(&mut self, tags: impl IntoIterator<Item = &'a Tag>) {
        for tag in tags {
            self.add_tag(&tag.category, &tag.value);
        }
    }

    /// Forget a full tag. Its category stays known.
    pub fn remove_tag(&mut self, category: &str, value: &str) -> bool {
        let removed = self.tags.remove(&format!("{}:{}", category, value));
        if removed {
            self.invalidate();
        }
        removed
    }

    pub fn has_tag(&self, category: &str, value: &str) -> bool {
        self.tags.contains(&format!("{}:{}", category, value))
    }

    pub fn clear(&mut self) {
        self.tags.clear();
        self.categories.clear();
        self.invalidate();
    }

    /// Number of distinct full tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Sorted categories (`cat:`) followed by sorted full tags.
    pub fn all_tags(&self) -> Vec<String> {
        self.all_categories()
            .iter()
            .chain(self.all_full_tags())
            .cloned()
            .collect()
    }

    pub fn all_categories(&self) -> &[String] {
        self.sorted_categories
            .get_or_init(|| sorted(&self.categories))
    }

    pub fn all_full_tags(&self) -> &[String] {
        self.sorted_tags.get_or_init(|| sorted(&self.tags))
    }

    /// Replace the contents with the tags of `records`.
    pub fn build_from<'a>(&mut self, records: impl IntoIterator<Item = &'a MediaRecord>) {
        self.clear();
        for record in records {
            self.add_tags(&record.tags);
        }
    }

    /// Autocomplete candidates for `query`, best first.
    ///
    /// An empty query returns the first `limit` entries of [`all_tags`]
    /// with a score of 1.0. Ties keep `all_tags` order.
    ///
    /// [`all_tags`]: TagIndex::all_tags
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        let query = query.trim();
        let candidates = self.all_tags();

        if query.is_empty() {
            return candidates
                .into_iter()
                .take(limit)
                .map(|c| (c, 1.0))
                .collect();
        }

        let mut scored: Vec<(String, f64)> = candidates
            .into_iter()
            .filter_map(|c| fuzzy::score(query, &c).map(|s| (c, s)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    fn invalidate(&mut self) {
        self.sorted_tags.take();
        self.sorted_categories.take();
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut items: Vec<String> = set.iter().cloned().collect();
    items.sort();
    items
}
