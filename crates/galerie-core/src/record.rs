//! Image record data model and canonical path mapping.
//!
//! A record's identity is its canonical path: the forward-slash normalized
//! path of the image relative to the watched root. The thumbnail location is
//! derived from the canonical path alone, so a stale thumbnail can always be
//! found and removed without a store lookup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Decoded container format of an indexed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Heic,
}

impl ImageFormat {
    /// Format for a lowercase file extension, if it maps to one we know.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "heic" | "heif" => Some(Self::Heic),
            _ => None,
        }
    }

    /// Lowercase name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Heic => "heic",
        }
    }

    /// Parse a stored format name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "heic" => Some(Self::Heic),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted entry per indexed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Forward-slash path relative to the watched root; unique identity key
    pub canonical_path: String,
    /// Derived thumbnail location, a pure function of `canonical_path`
    pub thumbnail_path: String,
    /// Pixel width of the source image
    pub width: u32,
    /// Pixel height of the source image
    pub height: u32,
    /// Size of the source file in bytes at last processing
    pub byte_size: u64,
    /// Decoded container format
    pub format: ImageFormat,
    /// True when the container carries more than one frame
    pub is_animated: bool,
    /// Filesystem mtime of the source (epoch seconds) at last processing
    pub source_modified_at: i64,
    /// Raw embedded EXIF data, stored verbatim and never interpreted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif: Option<Vec<u8>>,
}

/// Canonical path of `abs` relative to `root`: forward-slash normalized.
///
/// Returns `None` when `abs` is not under `root` or a component is not
/// valid UTF-8.
pub fn canonical_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Join a canonical path back onto a root directory.
pub fn join_canonical(root: &Path, canonical: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in canonical.split('/') {
        path.push(part);
    }
    path
}

/// Absolute thumbnail location for a canonical path.
///
/// The directory structure under the thumbnail root mirrors the source tree,
/// so this depends on nothing but the two inputs.
pub fn thumbnail_path(thumbnail_root: &Path, canonical: &str) -> PathBuf {
    join_canonical(thumbnail_root, canonical)
}
