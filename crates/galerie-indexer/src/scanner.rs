//! Recursive image discovery.
//!
//! Walks the watched tree to find image files for the initial scan and for
//! explicit full rebuilds. Hidden entries (dot-prefixed) are skipped at any
//! depth; directories are never reported.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

/// All image files under `root` with a supported extension, sorted.
pub fn scan_images(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(true)
        .build();

    let mut files = Vec::new();
    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if extensions.iter().any(|e| e == &ext) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    debug!(root = ?root, count = files.len(), "Scanned image tree");
    files
}
