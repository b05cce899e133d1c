//! Record files under `images/` and soft deletion into `deleted/`.
//!
//! Public operations report success through `bool`/`Option` so a failed write
//! never unwinds through the orchestrator. Each failure is logged once, here,
//! with the underlying [`VaultError`].

use crate::config::{extension_of, DeleteConfig, LayoutConfig, StoreConfig};
use crate::error::{Result, VaultError};
use crate::model::{validate_hash, MediaRecord, RecordFile};
use crate::persist::{atomic_read_json, atomic_write_bytes, atomic_write_json};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Access to the authoritative record files.
///
/// [`MediaLibrary`](crate::MediaLibrary) only reaches the filesystem through
/// this trait.
pub trait RecordStore {
    /// Write `images/{hash}.json`, replacing any existing file.
    fn save(&self, hash: &str, record: &MediaRecord) -> bool;

    /// Read `images/{hash}.json`. Missing and malformed files are both `None`.
    fn load(&self, hash: &str) -> Option<MediaRecord>;

    /// Write the `images/{hash}.txt` caption sidecar.
    fn save_caption(&self, hash: &str, caption: &str) -> bool;

    /// Move every `{hash}.*` file into `deleted/`.
    fn delete(&self, hash: &str) -> bool;

    /// Stems of every record file.
    fn scan_all(&self) -> BTreeSet<String>;

    /// First existing `images/{hash}.{ext}` over the known extensions.
    fn resolve_media_path(&self, hash: &str) -> Option<PathBuf>;

    /// Copy `source` to `images/{hash}.{ext}` unless it is already there.
    fn import_media(&self, hash: &str, source: &Path) -> Option<PathBuf>;

    /// Media files that have no record file yet, as `(hash, path)`.
    fn scan_orphan_media(&self) -> Vec<(String, PathBuf)>;
}

/// [`RecordStore`] over a library root directory.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    images_dir: PathBuf,
    deleted_dir: PathBuf,
    config: StoreConfig,
}

impl FileSystemStore {
    /// Create a store rooted at `root`, creating `images/` if needed.
    pub fn new(root: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let root = root.as_ref();
        let images_dir = root.join(LayoutConfig::IMAGES_DIR_NAME);
        fs::create_dir_all(&images_dir).map_err(|e| VaultError::io_with_path(e, &images_dir))?;

        Ok(Self {
            images_dir,
            deleted_dir: root.join(LayoutConfig::DELETED_DIR_NAME),
            config: config.clone(),
        })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn deleted_dir(&self) -> &Path {
        &self.deleted_dir
    }

    pub fn record_path(&self, hash: &str) -> PathBuf {
        self.images_dir
            .join(format!("{}.{}", hash, LayoutConfig::RECORD_EXTENSION))
    }

    pub fn caption_path(&self, hash: &str) -> PathBuf {
        self.images_dir
            .join(format!("{}.{}", hash, LayoutConfig::CAPTION_EXTENSION))
    }

    /// Load a record, keeping "missing" (`Ok(None)`) apart from "malformed"
    /// (`Err(VaultError::Malformed)`).
    pub fn load_checked(&self, hash: &str) -> Result<Option<MediaRecord>> {
        validate_hash(hash)?;
        let path = self.record_path(hash);
        let file: Option<RecordFile> = atomic_read_json(&path)?;
        Ok(file.map(|f| MediaRecord::from_file(hash, f)))
    }

    fn try_save(&self, hash: &str, record: &MediaRecord) -> Result<()> {
        validate_hash(hash)?;
        atomic_write_json(&self.record_path(hash), &record.to_file(), self.config.keep_json_backup)
    }

    fn try_save_caption(&self, hash: &str, caption: &str) -> Result<()> {
        validate_hash(hash)?;
        atomic_write_bytes(&self.caption_path(hash), caption.as_bytes())
    }

    fn try_delete(&self, hash: &str) -> Result<usize> {
        validate_hash(hash)?;
        let prefix = format!("{}.", hash);
        let files: Vec<PathBuf> = self
            .list_files()
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
            })
            .collect();

        if files.is_empty() {
            return Ok(0);
        }

        fs::create_dir_all(&self.deleted_dir)
            .map_err(|e| VaultError::io_with_path(e, &self.deleted_dir))?;

        for file in &files {
            let dest = self.free_deleted_path(file)?;
            fs::rename(file, &dest).map_err(|e| VaultError::io_with_path(e, file))?;
            debug!("Moved {} to {}", file.display(), dest.display());
        }
        Ok(files.len())
    }

    /// `deleted/{name}`, or `deleted/{stem}_{n}.{ext}` for the first free `n`.
    fn free_deleted_path(&self, file: &Path) -> Result<PathBuf> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let dest = self.deleted_dir.join(&name);
        if !dest.exists() {
            return Ok(dest);
        }

        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let suffix = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        for counter in 1..=DeleteConfig::MAX_COLLISION_SUFFIX {
            let candidate = self
                .deleted_dir
                .join(format!("{}_{}{}", stem, counter, suffix));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(VaultError::CollisionLimit {
            path: dest,
            attempts: DeleteConfig::MAX_COLLISION_SUFFIX,
        })
    }

    fn try_import(&self, hash: &str, source: &Path) -> Result<PathBuf> {
        validate_hash(hash)?;
        let ext = extension_of(source)
            .filter(|ext| self.config.is_media_extension(ext))
            .ok_or_else(|| VaultError::Validation {
                field: "source".to_string(),
                message: format!("unsupported media file {}", source.display()),
            })?;

        let dest = self.images_dir.join(format!("{}.{}", hash, ext));
        if dest.exists() {
            debug!("Media already present: {}", dest.display());
            return Ok(dest);
        }
        fs::copy(source, &dest).map_err(|e| VaultError::io_with_path(e, source))?;
        Ok(dest)
    }

    /// Regular files directly inside `images/`, skipping in-flight temp files.
    fn list_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.images_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| extension_of(p).as_deref() != Some("tmp"))
            .collect()
    }
}

impl RecordStore for FileSystemStore {
    fn save(&self, hash: &str, record: &MediaRecord) -> bool {
        match self.try_save(hash, record) {
            Ok(()) => {
                debug!("Saved record {}", hash);
                true
            }
            Err(e) => {
                warn!("Failed to save record {}: {}", hash, e);
                false
            }
        }
    }

    fn load(&self, hash: &str) -> Option<MediaRecord> {
        match self.load_checked(hash) {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                debug!("No record file for {}", hash);
                None
            }
            Err(e) if e.is_malformed() => {
                warn!("Ignoring malformed record {}: {}", hash, e);
                None
            }
            Err(e) => {
                warn!("Failed to load record {}: {}", hash, e);
                None
            }
        }
    }

    fn save_caption(&self, hash: &str, caption: &str) -> bool {
        match self.try_save_caption(hash, caption) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save caption for {}: {}", hash, e);
                false
            }
        }
    }

    fn delete(&self, hash: &str) -> bool {
        match self.try_delete(hash) {
            Ok(0) => {
                debug!("Nothing to delete for {}", hash);
                true
            }
            Ok(moved) => {
                info!("Soft-deleted {} ({} files)", hash, moved);
                true
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", hash, e);
                false
            }
        }
    }

    fn scan_all(&self) -> BTreeSet<String> {
        self.list_files()
            .into_iter()
            .filter(|p| extension_of(p).as_deref() == Some(LayoutConfig::RECORD_EXTENSION))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect()
    }

    fn resolve_media_path(&self, hash: &str) -> Option<PathBuf> {
        if validate_hash(hash).is_err() {
            return None;
        }
        self.config
            .media_extensions()
            .map(|ext| {
                self.images_dir
                    .join(format!("{}.{}", hash, ext.to_ascii_lowercase()))
            })
            .find(|path| path.is_file())
    }

    fn import_media(&self, hash: &str, source: &Path) -> Option<PathBuf> {
        match self.try_import(hash, source) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Failed to import {}: {}", source.display(), e);
                None
            }
        }
    }

    fn scan_orphan_media(&self) -> Vec<(String, PathBuf)> {
        let mut orphans: Vec<(String, PathBuf)> = self
            .list_files()
            .into_iter()
            .filter(|p| self.config.is_media_path(p))
            .filter_map(|p| {
                let hash = p.file_stem()?.to_string_lossy().to_string();
                (validate_hash(&hash).is_ok() && !self.record_path(&hash).exists())
                    .then_some((hash, p))
            })
            .collect();
        orphans.sort();
        orphans
    }
}
