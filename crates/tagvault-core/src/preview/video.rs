//! First-frame extraction through an external `ffmpeg` process.

use crate::error::{Result, VaultError};
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Decode the first frame of `video` by piping it out of `ffmpeg` as PNG.
pub fn first_frame(ffmpeg: &str, video: &Path) -> Result<DynamicImage> {
    let output = Command::new(ffmpeg)
        .arg("-v")
        .arg("error")
        .arg("-i")
        .arg(video)
        .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| VaultError::Io {
            message: format!("Failed to execute {}: {}", ffmpeg, e),
            path: Some(video.to_path_buf()),
            source: Some(e),
        })?;

    if !output.status.success() || output.stdout.is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VaultError::Image {
            message: format!(
                "{} could not decode a frame from {}: {}",
                ffmpeg,
                video.display(),
                stderr.trim()
            ),
        });
    }

    debug!(
        "Extracted first frame of {} ({} bytes)",
        video.display(),
        output.stdout.len()
    );
    Ok(image::load_from_memory_with_format(
        &output.stdout,
        ImageFormat::Png,
    )?)
}
