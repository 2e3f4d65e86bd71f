//! Image metadata extraction.
//!
//! Reads intrinsic properties (dimensions, container format, frame count,
//! byte size, raw EXIF) from a file's header without decoding pixel data.

use crate::heif;
use crate::IndexerError;
use galerie_core::ImageFormat;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Intrinsic properties of an image file.
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub is_animated: bool,
    pub byte_size: u64,
    pub exif: Option<Vec<u8>>,
}

/// Extract metadata for an image file.
///
/// Fails with `UnsupportedFormat` when the extension is not in the supported
/// set, `Unreadable` when the file cannot be opened or stat'd, and
/// `CorruptImage` when header parsing fails.
pub fn extract(path: &Path, extensions: &[String]) -> Result<ImageMetadata, IndexerError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| IndexerError::UnsupportedFormat(path.display().to_string()))?;

    if !extensions.iter().any(|e| e == &ext) {
        return Err(IndexerError::UnsupportedFormat(ext));
    }

    let byte_size = std::fs::metadata(path)
        .map_err(|_| IndexerError::Unreadable(path.to_path_buf()))?
        .len();

    let (width, height, format, is_animated) =
        if ImageFormat::from_extension(&ext) == Some(ImageFormat::Heic) {
            // HEIF dimensions come from the container's ispe box; no pixel
            // decoder is involved.
            let data =
                std::fs::read(path).map_err(|_| IndexerError::Unreadable(path.to_path_buf()))?;
            let (w, h) = heif::read_dimensions(&data)
                .ok_or_else(|| corrupt(path, "no ispe dimensions in HEIF container"))?;
            (w, h, ImageFormat::Heic, false)
        } else {
            probe(path)?
        };

    let exif = read_exif(path);

    debug!(path = ?path, width, height, format = %format, "Extracted metadata");

    Ok(ImageMetadata {
        width,
        height,
        format,
        is_animated,
        byte_size,
        exif,
    })
}

/// Header-only probe for the formats the `image` crate can identify.
fn probe(path: &Path) -> Result<(u32, u32, ImageFormat, bool), IndexerError> {
    let reader = image::ImageReader::open(path)
        .map_err(|_| IndexerError::Unreadable(path.to_path_buf()))?
        .with_guessed_format()
        .map_err(|_| IndexerError::Unreadable(path.to_path_buf()))?;

    // The stored format is the decoded container, not the extension.
    let format = reader
        .format()
        .and_then(container_format)
        .ok_or_else(|| corrupt(path, "unrecognized container"))?;

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| corrupt(path, e.to_string()))?;

    let is_animated = match format {
        ImageFormat::Gif => gif_is_animated(path)?,
        ImageFormat::Webp => webp_has_animation(path)?,
        ImageFormat::Png => png_is_apng(path)?,
        _ => false,
    };

    Ok((width, height, format, is_animated))
}

fn container_format(format: image::ImageFormat) -> Option<ImageFormat> {
    match format {
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::Gif => Some(ImageFormat::Gif),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        _ => None,
    }
}

/// A GIF is animated when it carries more than one frame. Probing stops
/// after the second frame.
fn gif_is_animated(path: &Path) -> Result<bool, IndexerError> {
    use image::AnimationDecoder;

    let file = File::open(path).map_err(|_| IndexerError::Unreadable(path.to_path_buf()))?;
    let decoder = image::codecs::gif::GifDecoder::new(BufReader::new(file))
        .map_err(|e| corrupt(path, e.to_string()))?;

    let mut frames = decoder.into_frames();
    let first = frames.next();
    let second = frames.next();
    Ok(first.is_some() && second.is_some())
}

/// Animation flag from the WebP VP8X chunk. Simple-format WebP files have
/// no VP8X chunk and are never animated.
fn webp_has_animation(path: &Path) -> Result<bool, IndexerError> {
    let mut file = File::open(path).map_err(|_| IndexerError::Unreadable(path.to_path_buf()))?;
    let mut header = [0u8; 21];
    if file.read_exact(&mut header).is_err() {
        return Err(corrupt(path, "truncated WebP header"));
    }
    is_animated_webp_header(&header).ok_or_else(|| corrupt(path, "invalid WebP header"))
}

fn is_animated_webp_header(header: &[u8; 21]) -> Option<bool> {
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WEBP" {
        return None;
    }
    if &header[12..16] == b"VP8X" {
        // Extended header flags: bit 0x02 marks an animation.
        Some(header[20] & 0x02 != 0)
    } else {
        Some(false)
    }
}

fn png_is_apng(path: &Path) -> Result<bool, IndexerError> {
    let file = File::open(path).map_err(|_| IndexerError::Unreadable(path.to_path_buf()))?;
    let decoder = image::codecs::png::PngDecoder::new(BufReader::new(file))
        .map_err(|e| corrupt(path, e.to_string()))?;
    decoder.is_apng().map_err(|e| corrupt(path, e.to_string()))
}

/// Best-effort raw EXIF blob; absence or parse failure is not an error.
fn read_exif(path: &Path) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let parsed = exif::Reader::new().read_from_container(&mut reader).ok()?;
    Some(parsed.buf().to_vec())
}

fn corrupt(path: &Path, message: impl ToString) -> IndexerError {
    IndexerError::CorruptImage {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}
