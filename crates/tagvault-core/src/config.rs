//! Centralized configuration for tagvault.
//!
//! Fixed layout names and defaults live in constant groups; the tunable parts
//! are collected in [`StoreConfig`], which can be loaded from a JSON file.

use crate::error::{Result, VaultError};
use crate::persist::atomic_read_json;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// On-disk layout of a library root.
pub struct LayoutConfig;

impl LayoutConfig {
    pub const IMAGES_DIR_NAME: &'static str = "images";
    pub const PROJECTS_DIR_NAME: &'static str = "projects";
    pub const DELETED_DIR_NAME: &'static str = "deleted";
    pub const CACHE_DIR_NAME: &'static str = "cache";
    pub const THUMBNAILS_DIR_NAME: &'static str = "thumbnails";
    pub const LOWRES_DIR_NAME: &'static str = "lowres";
    pub const DB_FILENAME: &'static str = "library.db";
    pub const CORRUPT_DB_SUFFIX: &'static str = "corrupt";
    pub const RECORD_EXTENSION: &'static str = "json";
    pub const CAPTION_EXTENSION: &'static str = "txt";
}

/// Preview generation defaults.
pub struct PreviewConfig;

impl PreviewConfig {
    pub const THUMBNAIL_SIZE: u32 = 150;
    pub const THUMBNAIL_QUALITY: u8 = 85;
    pub const LOWRES_MAX_DIM: u32 = 1024;
    pub const LOWRES_QUALITY: u8 = 90;
    pub const FFMPEG_BINARY: &'static str = "ffmpeg";
}

/// In-memory record cache defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const RECORD_CACHE_CAPACITY: usize = 1000;
}

/// Soft-delete behaviour.
pub struct DeleteConfig;

impl DeleteConfig {
    /// Upper bound on `name_N.ext` suffixes tried before giving up.
    pub const MAX_COLLISION_SUFFIX: u32 = 10_000;
}

/// SQLite index settings.
pub struct IndexConfig;

impl IndexConfig {
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
    pub const SCHEMA_VERSION: i32 = 2;
}

/// Image extensions tried when resolving a media file, in lookup order.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// Video extensions tried after the image extensions, in lookup order.
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v"];

/// Runtime configuration for an opened library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StoreConfig {
    /// Maximum number of parsed records kept in memory.
    pub record_cache_capacity: usize,
    /// Square bound for thumbnails, in pixels.
    pub thumbnail_size: u32,
    /// JPEG quality for thumbnails (1-100).
    pub thumbnail_quality: u8,
    /// Longest side of low-resolution previews, in pixels.
    pub lowres_max_dim: u32,
    /// JPEG quality for low-resolution previews (1-100).
    pub lowres_quality: u8,
    /// Image extensions, lower case, without the dot.
    pub image_extensions: Vec<String>,
    /// Video extensions, lower case, without the dot.
    pub video_extensions: Vec<String>,
    /// Program used to pull the first frame out of a video.
    pub ffmpeg_binary: String,
    /// Keep a `.json.bak` copy of the previous record on every write.
    pub keep_json_backup: bool,
    /// Rebuild the SQLite index from the record files whenever a library opens.
    pub rebuild_index_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            record_cache_capacity: CacheDefaults::RECORD_CACHE_CAPACITY,
            thumbnail_size: PreviewConfig::THUMBNAIL_SIZE,
            thumbnail_quality: PreviewConfig::THUMBNAIL_QUALITY,
            lowres_max_dim: PreviewConfig::LOWRES_MAX_DIM,
            lowres_quality: PreviewConfig::LOWRES_QUALITY,
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            video_extensions: DEFAULT_VIDEO_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            ffmpeg_binary: PreviewConfig::FFMPEG_BINARY.to_string(),
            keep_json_backup: false,
            rebuild_index_on_open: false,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults; a present file must parse and
    /// pass [`StoreConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: StoreConfig = atomic_read_json(path)?.unwrap_or_default();
        config.normalize_extensions();
        config.validate()?;
        Ok(config)
    }

    /// Lower-case every extension and strip a leading dot, so `".PNG"` and
    /// `"png"` mean the same thing.
    pub fn normalize_extensions(&mut self) {
        for ext in self
            .image_extensions
            .iter_mut()
            .chain(self.video_extensions.iter_mut())
        {
            *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        }
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.record_cache_capacity == 0 {
            return Err(config_error("record_cache_capacity must be at least 1"));
        }
        if self.thumbnail_size == 0 || self.lowres_max_dim == 0 {
            return Err(config_error("preview sizes must be non-zero"));
        }
        for (name, quality) in [
            ("thumbnail_quality", self.thumbnail_quality),
            ("lowres_quality", self.lowres_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(config_error(&format!(
                    "{} must be between 1 and 100, got {}",
                    name, quality
                )));
            }
        }
        for (name, list) in [
            ("image_extensions", &self.image_extensions),
            ("video_extensions", &self.video_extensions),
        ] {
            if list.is_empty() {
                return Err(config_error(&format!("{} must not be empty", name)));
            }
            if let Some(bad) = list.iter().find(|ext| !is_normalized_extension(ext)) {
                return Err(config_error(&format!(
                    "{} entry {:?} must be lower case, without a dot",
                    name, bad
                )));
            }
        }
        Ok(())
    }

    /// Image extensions followed by video extensions, in lookup order.
    pub fn media_extensions(&self) -> impl Iterator<Item = &str> {
        self.image_extensions
            .iter()
            .chain(self.video_extensions.iter())
            .map(String::as_str)
    }

    /// Whether `ext` (any case, no dot) is one of the video extensions.
    pub fn is_video_extension(&self, ext: &str) -> bool {
        extension_listed(ext, &self.video_extensions)
    }

    /// Whether `ext` (any case, no dot) is a known media extension.
    pub fn is_media_extension(&self, ext: &str) -> bool {
        self.media_extensions().any(|m| m.eq_ignore_ascii_case(ext))
    }

    pub fn is_video_path(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.is_video_extension(&ext))
    }

    pub fn is_media_path(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.is_media_extension(&ext))
    }
}

/// Lower-cased extension of `path`, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Whether `ext` appears in `known`, ignoring ASCII case.
pub fn extension_listed(ext: &str, known: &[String]) -> bool {
    known.iter().any(|k| k.eq_ignore_ascii_case(ext))
}

fn is_normalized_extension(ext: &str) -> bool {
    !ext.is_empty()
        && !ext.contains('.')
        && !ext.chars().any(|c| c.is_ascii_uppercase() || c.is_whitespace())
}

fn config_error(message: &str) -> VaultError {
    VaultError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.record_cache_capacity, 1000);
        assert_eq!(config.thumbnail_size, 150);
        assert_eq!(config.lowres_max_dim, 1024);
    }

    #[test]
    fn test_media_extension_order() {
        let config = StoreConfig::default();
        let order: Vec<&str> = config.media_extensions().collect();
        assert_eq!(order.first(), Some(&"png"));
        assert_eq!(order.last(), Some(&"m4v"));
        assert!(config.is_video_extension("MP4"));
        assert!(!config.is_video_extension("png"));
        assert!(config.is_media_extension("JPEG"));
        assert!(config.is_video_path(Path::new("clip.MOV")));
        assert!(config.is_media_path(Path::new("a/b.Png")));
        assert!(!config.is_media_path(Path::new("notes.txt")));
        assert!(!config.is_media_path(Path::new("no_extension")));
    }

    #[test]
    fn test_extension_lists_must_be_usable() {
        let empty_video = StoreConfig {
            video_extensions: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(empty_video.validate(), Err(VaultError::Config { .. })));

        let upper = StoreConfig {
            image_extensions: vec!["PNG".into()],
            ..Default::default()
        };
        assert!(matches!(upper.validate(), Err(VaultError::Config { .. })));

        let dotted = StoreConfig {
            video_extensions: vec![".mp4".into()],
            ..Default::default()
        };
        assert!(matches!(dotted.validate(), Err(VaultError::Config { .. })));
    }

    #[test]
    fn test_load_normalizes_extensions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "image_extensions": ["PNG", ".Jpg"], "video_extensions": ["MP4"] }"#,
        )
        .unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.image_extensions, ["png", "jpg"]);
        assert_eq!(config.video_extensions, ["mp4"]);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::load(&temp.path().join("absent.json")).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{ "record_cache_capacity": 5, "keep_json_backup": true }"#)
            .unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.record_cache_capacity, 5);
        assert!(config.keep_json_backup);
        assert_eq!(config.thumbnail_quality, 85);
    }

    #[test]
    fn test_invalid_quality_rejected() {
        let config = StoreConfig {
            lowres_quality: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VaultError::Config { .. })));
    }
}
