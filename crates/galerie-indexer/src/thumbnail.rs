//! Thumbnail generation.
//!
//! Resizes an image so its longer edge matches a target size, preserving
//! aspect ratio and never upscaling. Output is written to a temp file in the
//! destination directory and renamed into place, so a failed run can never
//! corrupt a previously written thumbnail.

use crate::IndexerError;
use image::imageops::FilterType;
use std::path::Path;
use tracing::debug;

/// Output dimensions for a fit-inside resize without enlargement.
pub fn fit_inside(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }
    if width >= height {
        let scaled = (height as u64 * max_edge as u64 / width as u64).max(1) as u32;
        (max_edge, scaled)
    } else {
        let scaled = (width as u64 * max_edge as u64 / height as u64).max(1) as u32;
        (scaled, max_edge)
    }
}

/// Generate a thumbnail for `src` at `dst`.
///
/// Creates missing parent directories. Returns the thumbnail dimensions.
/// On failure any partial output is removed and an existing thumbnail at
/// `dst` is left untouched.
pub fn generate(src: &Path, dst: &Path, max_edge: u32) -> Result<(u32, u32), IndexerError> {
    let img = image::open(src).map_err(|e| encode_err(src, e.to_string()))?;

    let (width, height) = fit_inside(img.width(), img.height(), max_edge);
    let thumb = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    };

    let format = image::ImageFormat::from_path(dst).map_err(|e| encode_err(dst, e.to_string()))?;

    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write-then-rename keeps the previous thumbnail valid until the new
    // one is complete.
    let tmp = temp_path(dst)?;
    if let Err(e) = thumb.save_with_format(&tmp, format) {
        let _ = std::fs::remove_file(&tmp);
        return Err(encode_err(dst, e.to_string()));
    }
    if let Err(e) = std::fs::rename(&tmp, dst) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    debug!(src = ?src, dst = ?dst, width, height, "Generated thumbnail");

    Ok((width, height))
}

fn temp_path(dst: &Path) -> Result<std::path::PathBuf, IndexerError> {
    let name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| encode_err(dst, "invalid thumbnail file name"))?;
    Ok(dst.with_file_name(format!(".{name}.tmp")))
}

fn encode_err(path: &Path, message: impl ToString) -> IndexerError {
    IndexerError::Encode {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}
