//! Regenerable thumbnail and low-resolution preview cache.
//!
//! Everything under `cache/` is derived from the media files and may be
//! deleted at any time; nothing here is ever read back as a data source.

mod video;

pub use video::first_frame;

use crate::config::{LayoutConfig, StoreConfig};
use crate::error::{Result, VaultError};
use crate::model::validate_hash;
use crate::persist::atomic_write_bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// JPEG previews keyed by media hash.
#[derive(Debug, Clone)]
pub struct PreviewCache {
    cache_dir: PathBuf,
    thumbnails_dir: PathBuf,
    lowres_dir: PathBuf,
    config: StoreConfig,
}

impl PreviewCache {
    /// Create the cache under `root/cache`, creating its directories.
    pub fn new(root: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let cache_dir = root.as_ref().join(LayoutConfig::CACHE_DIR_NAME);
        let cache = Self {
            thumbnails_dir: cache_dir.join(LayoutConfig::THUMBNAILS_DIR_NAME),
            lowres_dir: cache_dir.join(LayoutConfig::LOWRES_DIR_NAME),
            cache_dir,
            config: config.clone(),
        };
        cache.ensure_dirs()?;
        Ok(cache)
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.thumbnails_dir, &self.lowres_dir] {
            fs::create_dir_all(dir).map_err(|e| VaultError::io_with_path(e, dir))?;
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn thumbnail_path(&self, hash: &str) -> PathBuf {
        self.thumbnails_dir.join(format!("{}.jpg", hash))
    }

    pub fn lowres_path(&self, hash: &str, max_dim: u32) -> PathBuf {
        self.lowres_dir.join(format!("{}_{}.jpg", hash, max_dim))
    }

    /// Cached square-bounded thumbnail of `source`, generated on a miss.
    pub fn get_thumbnail(&self, hash: &str, source: &Path) -> Option<PathBuf> {
        if !is_cache_key(hash) {
            return None;
        }
        let dest = self.thumbnail_path(hash);
        if dest.exists() {
            return Some(dest);
        }
        self.generate(
            hash,
            source,
            &dest,
            self.config.thumbnail_size,
            self.config.thumbnail_quality,
        )
    }

    /// Cached preview of `source` no larger than `max_dim` on either side.
    pub fn get_lowres(&self, hash: &str, source: &Path, max_dim: u32) -> Option<PathBuf> {
        if !is_cache_key(hash) {
            return None;
        }
        let dest = self.lowres_path(hash, max_dim);
        if dest.exists() {
            return Some(dest);
        }
        self.generate(hash, source, &dest, max_dim, self.config.lowres_quality)
    }

    fn generate(
        &self,
        hash: &str,
        source: &Path,
        dest: &Path,
        bound: u32,
        quality: u8,
    ) -> Option<PathBuf> {
        let rendered = self
            .decode(source)
            .and_then(|img| encode_jpeg(&shrink_to_fit(img, bound), quality))
            .and_then(|bytes| atomic_write_bytes(dest, &bytes));

        match rendered {
            Ok(()) => {
                debug!("Generated preview {}", dest.display());
                Some(dest.to_path_buf())
            }
            Err(e) => {
                warn!("Failed to generate preview for {}: {}", hash, e);
                None
            }
        }
    }

    fn decode(&self, source: &Path) -> Result<DynamicImage> {
        if self.config.is_video_path(source) {
            first_frame(&self.config.ffmpeg_binary, source)
        } else {
            Ok(image::open(source)?)
        }
    }

    /// Remove every cached output for `hash`. Returns the number of files removed.
    pub fn evict(&self, hash: &str) -> usize {
        if !is_cache_key(hash) {
            return 0;
        }
        let lowres_prefix = format!("{}_", hash);
        let mut targets = vec![self.thumbnail_path(hash)];
        targets.extend(
            WalkDir::new(&self.lowres_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name().to_string_lossy();
                    name.starts_with(&lowres_prefix) && name.ends_with(".jpg")
                })
                .map(|e| e.into_path()),
        );

        let mut removed = 0;
        for path in targets.iter().filter(|p| p.exists()) {
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to evict {}: {}", path.display(), e),
            }
        }
        removed
    }

    /// Delete the whole cache tree and recreate the empty layout.
    pub fn clear(&self) -> Result<()> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)
                .map_err(|e| VaultError::io_with_path(e, &self.cache_dir))?;
        }
        self.ensure_dirs()?;
        info!("Cleared preview cache at {}", self.cache_dir.display());
        Ok(())
    }

    /// Total size of cached files in bytes.
    pub fn size(&self) -> u64 {
        WalkDir::new(&self.cache_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}

/// Hashes name files directly inside the cache directories; anything that
/// could resolve elsewhere is refused.
fn is_cache_key(hash: &str) -> bool {
    match validate_hash(hash) {
        Ok(()) => true,
        Err(e) => {
            warn!("Refusing preview request: {}", e);
            false
        }
    }
}

/// Shrink `img` to fit a `bound`x`bound` square, keeping its aspect ratio.
/// Images already inside the bound are returned unchanged.
fn shrink_to_fit(img: DynamicImage, bound: u32) -> DynamicImage {
    if img.width() <= bound && img.height() <= bound {
        return img;
    }
    img.resize(bound, bound, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)?;
    Ok(bytes)
}
