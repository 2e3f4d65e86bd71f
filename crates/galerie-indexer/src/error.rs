//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while synchronizing the image index.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Extension is not in the supported set
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Source file could not be opened or stat'd
    #[error("Unreadable file: {0}")]
    Unreadable(PathBuf),

    /// Image header could not be parsed
    #[error("Corrupt image {path}: {message}")]
    CorruptImage { path: PathBuf, message: String },

    /// Thumbnail resize or re-encode failed
    #[error("Encode error for {path}: {message}")]
    Encode { path: PathBuf, message: String },

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// File watcher fault
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Requested path does not exist
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Requested path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}
