//! The library session: read/write entry points over every tier.
//!
//! Reads check staging, then the record cache, then the record files. Writes
//! only stage. [`MediaLibrary::commit_all`] pushes staged edits to the files
//! first and to the index second, and keeps only what failed staged.

use crate::config::{LayoutConfig, StoreConfig};
use crate::error::{Result, VaultError};
use crate::hashing::compute_media_hash_with;
use crate::index::{IndexStore, RebuildReport};
use crate::model::{MediaRecord, RecordKind};
use crate::preview::PreviewCache;
use crate::record_cache::RecordCache;
use crate::staging::StagingArea;
use crate::store::{FileSystemStore, RecordStore};
use crate::tag_index::TagIndex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Outcome of [`MediaLibrary::commit_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Hashes whose record file was written.
    pub saved: Vec<String>,
    /// Hashes that were not written, with the reason. These stay staged.
    pub failed: Vec<(String, String)>,
    /// Hashes written to disk whose index update failed; `rebuild_index` repairs them.
    pub index_drift: Vec<String>,
    /// Hashes soft-deleted.
    pub removed: Vec<String>,
    /// Project-level state was marked dirty and needs saving by the caller.
    pub project_modified: bool,
    pub library_modified: bool,
}

impl CommitReport {
    /// True when every staged record and removal reached the filesystem.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of regenerating previews for every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewReport {
    /// Thumbnails present after the pass.
    pub available: usize,
    /// Hashes whose media file could not be found.
    pub missing_source: Vec<String>,
    /// Hashes whose media file could not be decoded.
    pub failed: Vec<String>,
}

/// Statistics about the library.
#[derive(Debug, Clone, Default)]
pub struct LibraryStats {
    /// Record files on disk
    pub records: usize,
    /// Rows in the index
    pub indexed: usize,
    /// Indexed records by kind
    pub by_kind: BTreeMap<String, usize>,
    /// Distinct tags known to the session
    pub distinct_tags: usize,
    /// Staged records plus staged removals
    pub staged_changes: usize,
    /// Size of `images/` in bytes
    pub media_size_bytes: u64,
    /// Size of `cache/` in bytes
    pub cache_size_bytes: u64,
}

/// An open media library.
///
/// One instance per library root; it is the only writer of its staging area,
/// record cache and tag index.
pub struct MediaLibrary<S: RecordStore = FileSystemStore> {
    root: PathBuf,
    config: StoreConfig,
    store: S,
    index: IndexStore,
    previews: PreviewCache,
    staging: StagingArea,
    cache: RecordCache,
    tags: TagIndex,
}

impl MediaLibrary<FileSystemStore> {
    /// Open the library at `root` with the default configuration.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(root, StoreConfig::default())
    }

    /// Open the library at `root`, creating its layout if needed.
    pub fn open_with_config(root: impl Into<PathBuf>, mut config: StoreConfig) -> Result<Self> {
        let root = root.into();
        config.normalize_extensions();
        config.validate()?;
        let store = FileSystemStore::new(&root, &config)?;
        Self::with_store(root, config, store)
    }
}

impl<S: RecordStore> MediaLibrary<S> {
    /// Open the library at `root` over a caller-supplied record store.
    ///
    /// The index is rebuilt from the store when it was just created, when it
    /// is empty while records exist, or when `rebuild_index_on_open` is set.
    pub fn with_store(root: impl Into<PathBuf>, mut config: StoreConfig, store: S) -> Result<Self> {
        let root = root.into();
        config.normalize_extensions();
        config.validate()?;

        let projects_dir = root.join(LayoutConfig::PROJECTS_DIR_NAME);
        fs::create_dir_all(&projects_dir)
            .map_err(|e| VaultError::io_with_path(e, &projects_dir))?;

        let (index, fresh) = open_index(&root.join(LayoutConfig::DB_FILENAME))?;
        let previews = PreviewCache::new(&root, &config)?;

        let mut library = Self {
            cache: RecordCache::new(config.record_cache_capacity),
            root,
            config,
            store,
            index,
            previews,
            staging: StagingArea::new(),
            tags: TagIndex::new(),
        };

        let on_disk = library.store.scan_all().len();
        let empty_index = library.index.count()? == 0;
        if on_disk > 0 && (fresh || empty_index || library.config.rebuild_index_on_open) {
            if let Err(e) = library.rebuild_index() {
                warn!("Failed to rebuild index on open: {}", e);
            }
        }
        library.rebuild_tag_index_from_library();

        info!(
            "Opened library {} ({} records, {} tags)",
            library.root.display(),
            on_disk,
            library.tags.len()
        );
        Ok(library)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut IndexStore {
        &mut self.index
    }

    pub fn previews(&self) -> &PreviewCache {
        &self.previews
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    pub fn record_cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn all_tags(&self) -> Vec<String> {
        self.tags.all_tags()
    }

    pub fn all_categories(&self) -> &[String] {
        self.tags.all_categories()
    }

    // ========================================
    // Read / write
    // ========================================

    /// The current version of `hash`: staged, else cached, else from disk.
    ///
    /// `None` means there is no record yet (or its removal is staged).
    pub fn load(&mut self, hash: &str) -> Option<MediaRecord> {
        if let Some(record) = self.staging.get(hash) {
            return Some(record.clone());
        }
        if self.staging.is_removal_staged(hash) {
            return None;
        }
        if let Some(record) = self.cache.get(hash) {
            return Some(record.clone());
        }

        let record = self.store.load(hash)?;
        self.cache.insert(hash, record.clone());
        Some(record)
    }

    /// Like [`MediaLibrary::load`], but a missing record is an error.
    pub fn require(&mut self, hash: &str) -> Result<MediaRecord> {
        self.load(hash).ok_or_else(|| VaultError::RecordNotFound {
            hash: hash.to_string(),
        })
    }

    /// Stage `record` for `hash` and make its tags searchable. No I/O.
    pub fn save(&mut self, hash: impl Into<String>, record: MediaRecord) {
        self.tags.add_tags(&record.tags);
        self.staging.stage_record(hash, record);
    }

    /// Stage a soft delete of `hash`. No I/O.
    pub fn remove(&mut self, hash: impl Into<String>) {
        self.staging.stage_removal(hash);
    }

    pub fn mark_project_dirty(&mut self) {
        self.staging.mark_project_dirty();
    }

    /// Write every staged change through the tiers.
    ///
    /// Record files are written first; only records whose file write
    /// succeeded are projected into the index. Removals move files to
    /// `deleted/`, then drop the index row and cached previews. Whatever
    /// failed is left staged for a retry.
    pub fn commit_all(&mut self) -> CommitReport {
        let mut report = CommitReport::default();
        if !self.staging.has_changes() {
            return report;
        }

        let mut written = Vec::new();
        for (hash, record) in self.staging.take_records() {
            self.cache.invalidate(&hash);

            if !self.store.save(&hash, &record) {
                error!("Record {} was not written; keeping it staged", hash);
                report
                    .failed
                    .push((hash.clone(), "record file write failed".to_string()));
                self.staging.stage_record(hash, record);
                continue;
            }

            if !record.caption.is_empty() && !self.store.save_caption(&hash, &record.caption) {
                warn!("Caption sidecar for {} was not written", hash);
            }
            report.saved.push(hash.clone());
            written.push((hash, record));
        }

        for (hash, record) in &written {
            if !self.index.upsert(hash, record) {
                warn!("Index is out of date for {}; rebuild the index to repair", hash);
                report.index_drift.push(hash.clone());
            }
        }

        for hash in self.staging.take_removals() {
            self.cache.invalidate(&hash);

            if !self.store.delete(&hash) {
                error!("Soft delete of {} failed; keeping it staged", hash);
                report
                    .failed
                    .push((hash.clone(), "soft delete failed".to_string()));
                self.staging.stage_removal(hash);
                continue;
            }

            if !self.index.delete(&hash) {
                report.index_drift.push(hash.clone());
            }
            self.previews.evict(&hash);
            report.removed.push(hash);
        }

        report.project_modified = self.staging.is_project_dirty();
        report.library_modified = self.staging.is_library_dirty();
        self.staging.clear_flags();

        info!(
            "Commit: {} saved, {} removed, {} failed, {} index drift",
            report.saved.len(),
            report.removed.len(),
            report.failed.len(),
            report.index_drift.len()
        );
        report
    }

    /// Drop all staged changes and cached records, then rebuild the tag index
    /// from the files.
    pub fn revert_all(&mut self) {
        let dropped = self.staging.change_count();
        self.staging.clear();
        self.cache.clear();
        self.rebuild_tag_index_from_library();
        info!("Reverted {} staged changes", dropped);
    }

    // ========================================
    // Tag index
    // ========================================

    /// Rebuild the tag index from the records of `hashes`.
    pub fn rebuild_tag_index<I>(&mut self, hashes: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.tags.clear();
        for hash in hashes {
            if let Some(record) = self.load(hash.as_ref()) {
                self.tags.add_tags(&record.tags);
            }
        }
        debug!("Tag index rebuilt with {} tags", self.tags.len());
    }

    /// Rebuild the tag index from every record file plus staged records.
    pub fn rebuild_tag_index_from_library(&mut self) {
        let mut hashes = self.store.scan_all();
        hashes.extend(self.staging.modified_hashes());
        self.rebuild_tag_index(hashes);
    }

    // ========================================
    // Index maintenance
    // ========================================

    /// Drop the index and re-project every record file.
    pub fn rebuild_index(&mut self) -> Result<RebuildReport> {
        self.index.rebuild_from(&self.store)
    }

    // ========================================
    // Import
    // ========================================

    /// Hash `path`, copy it into the library and stage a new image record.
    ///
    /// A file whose content is already in the library is not staged again;
    /// its existing hash is returned.
    pub fn import_file(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let hash = compute_media_hash_with(
            path,
            &self.config.video_extensions,
            &self.config.ffmpeg_binary,
        )?;

        self.store
            .import_media(&hash, path)
            .ok_or_else(|| VaultError::Io {
                message: format!("Failed to copy {} into the library", path.display()),
                path: Some(path.to_path_buf()),
                source: None,
            })?;

        if self.load(&hash).is_some() {
            debug!("{} is already in the library as {}", path.display(), hash);
            return Ok(hash);
        }

        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut record = MediaRecord::image(hash.clone());
        record.name = hash.clone();
        record.add_tag("name", original_name);

        self.save(hash.clone(), record);
        self.staging.mark_library_dirty();
        info!("Imported {} as {}", path.display(), hash);
        Ok(hash)
    }

    /// Stage records for media files in `images/` that have none yet.
    pub fn scan_new_files(&mut self) -> usize {
        let mut added = 0;
        for (hash, path) in self.store.scan_orphan_media() {
            if self.staging.contains(&hash) {
                continue;
            }
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let mut record = MediaRecord::image(hash.clone());
            record.name = hash.clone();
            record.add_tag("name", file_name);
            self.save(hash, record);
            added += 1;
        }

        if added > 0 {
            self.staging.mark_library_dirty();
            info!("Found {} new media files", added);
        }
        added
    }

    // ========================================
    // Previews
    // ========================================

    pub fn thumbnail(&self, hash: &str) -> Option<PathBuf> {
        let source = self.store.resolve_media_path(hash)?;
        self.previews.get_thumbnail(hash, &source)
    }

    pub fn lowres(&self, hash: &str) -> Option<PathBuf> {
        let source = self.store.resolve_media_path(hash)?;
        self.previews
            .get_lowres(hash, &source, self.config.lowres_max_dim)
    }

    /// Make sure every record has a thumbnail.
    pub fn regenerate_thumbnails(&self) -> PreviewReport {
        let mut report = PreviewReport::default();
        for hash in self.store.scan_all() {
            match self.store.resolve_media_path(&hash) {
                None => report.missing_source.push(hash),
                Some(source) => match self.previews.get_thumbnail(&hash, &source) {
                    Some(_) => report.available += 1,
                    None => report.failed.push(hash),
                },
            }
        }
        info!(
            "Thumbnails: {} available, {} without source, {} failed",
            report.available,
            report.missing_source.len(),
            report.failed.len()
        );
        report
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.previews.clear()
    }

    pub fn cache_size(&self) -> u64 {
        self.previews.size()
    }

    // ========================================
    // Statistics
    // ========================================

    pub fn stats(&self) -> Result<LibraryStats> {
        let mut stats = LibraryStats {
            records: self.store.scan_all().len(),
            indexed: self.index.count()?,
            distinct_tags: self.tags.len(),
            staged_changes: self.staging.change_count(),
            cache_size_bytes: self.previews.size(),
            ..Default::default()
        };

        for kind in RecordKind::ALL {
            let count = self.index.get_all_hashes(Some(kind))?.len();
            if count > 0 {
                stats.by_kind.insert(kind.to_string(), count);
            }
        }

        let images_dir = self.root.join(LayoutConfig::IMAGES_DIR_NAME);
        stats.media_size_bytes = WalkDir::new(&images_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();

        Ok(stats)
    }
}

/// Open the index, moving an unreadable database aside and starting over.
/// The flag is true when the index was created by this call.
fn open_index(db_path: &Path) -> Result<(IndexStore, bool)> {
    let existed = db_path.exists();
    match IndexStore::open(db_path) {
        Ok(index) => Ok((index, !existed)),
        Err(e) => {
            let aside = db_path.with_file_name(format!(
                "{}.{}",
                LayoutConfig::DB_FILENAME,
                LayoutConfig::CORRUPT_DB_SUFFIX
            ));
            warn!(
                "Index at {} is unusable ({}); moving it to {}",
                db_path.display(),
                e,
                aside.display()
            );
            fs::rename(db_path, &aside).map_err(|e| VaultError::io_with_path(e, db_path))?;
            remove_journal_files(db_path);
            Ok((IndexStore::open(db_path)?, true))
        }
    }
}

/// Remove the WAL and shared-memory files left by a database that was moved
/// aside. Failures are logged; SQLite reports them again if they matter.
fn remove_journal_files(db_path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let side = db_path.with_file_name(format!("{}{}", LayoutConfig::DB_FILENAME, suffix));
        if !side.exists() {
            continue;
        }
        if let Err(e) = fs::remove_file(&side) {
            warn!("Failed to remove {}: {}", side.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_library() -> (MediaLibrary, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let library = MediaLibrary::open(temp_dir.path()).unwrap();
        (library, temp_dir)
    }

    fn tagged(hash: &str, category: &str, value: &str) -> MediaRecord {
        let mut record = MediaRecord::image(hash);
        record.add_tag(category, value);
        record
    }

    #[test]
    fn test_open_creates_layout() {
        let (library, temp) = create_test_library();
        for dir in ["images", "projects", "cache/thumbnails", "cache/lowres"] {
            assert!(temp.path().join(dir).is_dir(), "{} missing", dir);
        }
        assert!(temp.path().join("library.db").exists());
        assert!(!library.staging().has_changes());
    }

    #[test]
    fn test_save_is_staged_only() {
        let (mut library, temp) = create_test_library();
        library.save("abc", tagged("abc", "class", "cat"));

        assert!(!temp.path().join("images/abc.json").exists());
        assert!(library.tag_index().has_tag("class", "cat"));
        assert_eq!(library.load("abc").unwrap().tags.len(), 1);
    }

    #[test]
    fn test_commit_writes_file_index_and_caption() {
        let (mut library, temp) = create_test_library();
        let mut record = tagged("abc", "class", "cat");
        record.caption = "a cat".into();
        library.save("abc", record);

        let report = library.commit_all();
        assert!(report.is_success());
        assert_eq!(report.saved, ["abc"]);
        assert!(!library.staging().has_changes());
        assert_eq!(
            fs::read_to_string(temp.path().join("images/abc.txt")).unwrap(),
            "a cat"
        );
        assert_eq!(library.index().get_all_hashes(None).unwrap(), ["abc"]);
    }

    #[test]
    fn test_empty_commit_is_noop() {
        let (mut library, _temp) = create_test_library();
        assert_eq!(library.commit_all(), CommitReport::default());
    }

    #[test]
    fn test_remove_commits_soft_delete() {
        let (mut library, temp) = create_test_library();
        library.save("abc", tagged("abc", "class", "cat"));
        library.commit_all();

        library.remove("abc");
        assert!(library.load("abc").is_none());
        let report = library.commit_all();
        assert_eq!(report.removed, ["abc"]);
        assert!(temp.path().join("deleted/abc.json").exists());
        assert_eq!(library.index().count().unwrap(), 0);
    }

    #[test]
    fn test_flags_reported_and_cleared() {
        let (mut library, _temp) = create_test_library();
        library.mark_project_dirty();
        let report = library.commit_all();
        assert!(report.project_modified);
        assert!(!library.staging().has_changes());
    }

    #[test]
    fn test_revert_restores_disk_state() {
        let (mut library, _temp) = create_test_library();
        library.save("abc", tagged("abc", "class", "cat"));
        library.commit_all();

        library.save("abc", tagged("abc", "class", "dog"));
        assert!(library.tag_index().has_tag("class", "dog"));
        library.revert_all();

        assert_eq!(library.load("abc").unwrap().tags[0].value, "cat");
        assert!(!library.tag_index().has_tag("class", "dog"));
    }

    #[test]
    fn test_corrupt_index_moved_aside_and_rebuilt() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut library = MediaLibrary::open(temp_dir.path()).unwrap();
            library.save("abc", tagged("abc", "class", "cat"));
            library.commit_all();
        }
        let db = temp_dir.path().join("library.db");
        for side in ["library.db-wal", "library.db-shm"] {
            let _ = fs::remove_file(temp_dir.path().join(side));
        }
        fs::write(&db, b"this is not a sqlite database, not even close....").unwrap();

        let library = MediaLibrary::open(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join("library.db.corrupt").exists());
        assert_eq!(library.index().get_all_hashes(None).unwrap(), ["abc"]);
    }

    #[test]
    fn test_require_reports_missing_record() {
        let (mut library, _temp) = create_test_library();
        library.save("abc", tagged("abc", "class", "cat"));
        assert_eq!(library.require("abc").unwrap().tags.len(), 1);

        let err = library.require("nope").unwrap_err();
        assert!(err.is_not_found());

        library.remove("abc");
        assert!(library.require("abc").unwrap_err().is_not_found());
    }

    #[test]
    fn test_upper_case_extensions_are_normalized_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            image_extensions: vec!["PNG".into(), ".JPG".into()],
            ..Default::default()
        };
        let mut library = MediaLibrary::open_with_config(temp_dir.path(), config).unwrap();
        assert_eq!(library.config().image_extensions, ["png", "jpg"]);

        fs::write(temp_dir.path().join("images/shot.PNG"), b"x").unwrap();
        assert_eq!(library.scan_new_files(), 1);
        assert!(library.load("shot").is_some());
    }

    #[test]
    fn test_remove_journal_files() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("library.db");
        fs::write(temp_dir.path().join("library.db-wal"), b"stale").unwrap();
        fs::create_dir(temp_dir.path().join("library.db-shm")).unwrap();

        remove_journal_files(&db);
        assert!(!temp_dir.path().join("library.db-wal").exists());
        // A directory cannot be removed as a file; that is logged, not fatal.
        assert!(temp_dir.path().join("library.db-shm").is_dir());
    }

    #[test]
    fn test_scan_new_files_uses_file_name_tag() {
        let (mut library, temp) = create_test_library();
        fs::write(temp.path().join("images/feed.png"), b"x").unwrap();

        assert_eq!(library.scan_new_files(), 1);
        let record = library.load("feed").unwrap();
        assert_eq!(record.name, "feed");
        assert_eq!(record.display_name(), "feed.png");
        assert_eq!(library.scan_new_files(), 0);
    }
}
