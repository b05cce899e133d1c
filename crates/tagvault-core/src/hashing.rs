//! Content hashes used as media identifiers.
//!
//! Still images hash their decoded RGBA pixels, so re-encoding a file without
//! changing its pixels keeps its identity. Videos hash their first frame plus
//! the file size. Anything that cannot be decoded falls back to the raw bytes.

use crate::config::{extension_listed, extension_of, PreviewConfig};
use crate::error::{Result, VaultError};
use crate::preview::first_frame;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Number of hex characters kept from the SHA-256 digest.
pub const HASH_LENGTH: usize = 16;

/// Chunk size for streaming raw file bytes.
const CHUNK_SIZE: usize = 64 * 1024;

/// Compute the media hash of `path`, using the default `ffmpeg` for videos.
pub fn compute_media_hash(path: impl AsRef<Path>, video_extensions: &[String]) -> Result<String> {
    compute_media_hash_with(path, video_extensions, PreviewConfig::FFMPEG_BINARY)
}

/// Compute the media hash of `path`, decoding videos with `ffmpeg`.
pub fn compute_media_hash_with(
    path: impl AsRef<Path>,
    video_extensions: &[String],
    ffmpeg: &str,
) -> Result<String> {
    let path = path.as_ref();
    let is_video = extension_of(path).is_some_and(|ext| extension_listed(&ext, video_extensions));

    let digest = if is_video {
        hash_video(path, ffmpeg)?
    } else {
        hash_image(path)?
    };
    Ok(digest[..HASH_LENGTH].to_string())
}

fn hash_image(path: &Path) -> Result<String> {
    match image::open(path) {
        Ok(img) => {
            let mut hasher = Sha256::new();
            hasher.update(img.to_rgba8().as_raw());
            Ok(hex::encode(hasher.finalize()))
        }
        Err(e) => {
            debug!("Hashing raw bytes of {}: {}", path.display(), e);
            hash_file_bytes(path)
        }
    }
}

fn hash_video(path: &Path, ffmpeg: &str) -> Result<String> {
    let size = std::fs::metadata(path)
        .map_err(|e| VaultError::io_with_path(e, path))?
        .len();

    match first_frame(ffmpeg, path) {
        Ok(frame) => {
            let mut hasher = Sha256::new();
            hasher.update(frame.to_rgb8().as_raw());
            hasher.update(size.to_string().as_bytes());
            Ok(hex::encode(hasher.finalize()))
        }
        Err(e) => {
            debug!("Hashing raw bytes of {}: {}", path.display(), e);
            hash_file_bytes(path)
        }
    }
}

fn hash_file_bytes(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| VaultError::io_with_path(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| VaultError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn no_videos() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn test_same_pixels_same_hash_across_formats() {
        let temp_dir = TempDir::new().unwrap();
        let img = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));
        let png = temp_dir.path().join("a.png");
        let bmp = temp_dir.path().join("a.bmp");
        img.save_with_format(&png, ImageFormat::Png).unwrap();
        img.save_with_format(&bmp, ImageFormat::Bmp).unwrap();

        let a = compute_media_hash(&png, &no_videos()).unwrap();
        let b = compute_media_hash(&bmp, &no_videos()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_pixels_differ() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("1.png");
        let second = temp_dir.path().join("2.png");
        RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]))
            .save(&first)
            .unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 254]))
            .save(&second)
            .unwrap();

        assert_ne!(
            compute_media_hash(&first, &no_videos()).unwrap(),
            compute_media_hash(&second, &no_videos()).unwrap()
        );
    }

    #[test]
    fn test_undecodable_falls_back_to_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("x.png");
        std::fs::write(&path, b"hello").unwrap();

        // sha256("hello")
        assert_eq!(
            compute_media_hash(&path, &no_videos()).unwrap(),
            "2cf24dba5fb0a30e"
        );
    }

    #[test]
    fn test_video_without_ffmpeg_falls_back_to_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.mp4");
        std::fs::write(&path, b"hello").unwrap();

        let hash =
            compute_media_hash_with(&path, &["mp4".to_string()], "tagvault-no-such-ffmpeg")
                .unwrap();
        assert_eq!(hash, "2cf24dba5fb0a30e");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(compute_media_hash(temp_dir.path().join("nope.png"), &no_videos()).is_err());
    }
}
