//! Galerie Indexing Engine
//!
//! Keeps a gallery's image index synchronized with a directory tree: a
//! debounced file watcher feeds change events to an orchestrator that
//! extracts metadata, generates thumbnails, and persists records in SQLite.

mod error;
mod heif;

pub mod extract;
pub mod indexer;
pub mod scanner;
pub mod store;
pub mod thumbnail;
pub mod watcher;

pub use error::IndexerError;
pub use indexer::{Indexer, ListingEntry, RescanSummary};
pub use store::Store;
pub use watcher::{ChangeEvent, ChangeKind, FileWatcher};
