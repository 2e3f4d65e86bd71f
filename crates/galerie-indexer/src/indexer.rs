//! Processing orchestrator.
//!
//! Consumes change events from the watcher and drives extraction, thumbnail
//! generation, and store updates. Work is keyed by canonical path: at most
//! one run per path is in flight at any time, and events arriving while a
//! path is busy coalesce into a single follow-up run. A removal queued
//! behind an in-flight run always wins over a create or modify.

use crate::scanner;
use crate::thumbnail;
use crate::watcher::{ChangeEvent, ChangeKind};
use crate::{extract, IndexerError, Store};
use galerie_core::{canonical_path, join_canonical, thumbnail_path, GalleryConfig, ImageRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ListingEntry {
    Folder {
        name: String,
        path: String,
    },
    Image {
        name: String,
        path: String,
        /// `None` when the image exists on disk but could not be indexed.
        record: Option<ImageRecord>,
    },
}

/// Outcome of a full rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RescanSummary {
    pub indexed: usize,
    /// Canonical path and error message for each file that failed.
    pub failed: Vec<(String, String)>,
    pub duration_ms: u64,
}

#[derive(Default)]
struct DispatchState {
    /// Paths with a run currently in flight.
    running: HashSet<String>,
    /// Latest coalesced event for paths that changed again while busy.
    queued: HashMap<String, ChangeKind>,
}

struct Inner {
    config: GalleryConfig,
    store: Store,
    state: Mutex<DispatchState>,
    jobs: Arc<Semaphore>,
}

/// Shared handle to the orchestrator.
#[derive(Clone)]
pub struct Indexer {
    inner: Arc<Inner>,
}

impl Indexer {
    pub fn new(config: GalleryConfig, store: Store) -> Self {
        let jobs = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                state: Mutex::new(DispatchState::default()),
                jobs,
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Consume change events until the sender side closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<ChangeEvent>) {
        while let Some(event) = rx.recv().await {
            self.submit(event.kind, event.path);
        }
        debug!("Event channel closed, orchestrator stopping");
    }

    /// Dispatch one event, coalescing if the path is already being worked on.
    fn submit(&self, kind: ChangeKind, canonical: String) {
        let mut state = self.inner.state.lock();
        if state.running.contains(&canonical) {
            match state.queued.entry(canonical) {
                Entry::Occupied(mut slot) => {
                    // A queued removal is never downgraded.
                    if *slot.get() != ChangeKind::Removed {
                        slot.insert(kind);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(kind);
                }
            }
            return;
        }
        state.running.insert(canonical.clone());
        drop(state);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.work(kind, canonical));
    }

    /// Index one path on demand and return its record.
    ///
    /// When a dispatched run for the path is already in flight, the stored
    /// record is returned instead of starting a competing run.
    pub async fn process_path(&self, canonical: &str) -> Result<ImageRecord, IndexerError> {
        {
            let mut state = self.inner.state.lock();
            if state.running.contains(canonical) {
                drop(state);
                return self.inner.store.get(canonical)?.ok_or_else(|| {
                    IndexerError::NotFound(join_canonical(
                        &self.inner.config.watch_root,
                        canonical,
                    ))
                });
            }
            state.running.insert(canonical.to_string());
        }

        // On-demand runs share the worker bound with dispatched runs. The
        // semaphore is never closed.
        let result = {
            let _permit = self.inner.jobs.acquire().await.ok();
            self.inner.process(canonical).await
        };

        // Events that arrived while we held the path continue on the
        // dispatched track, keeping the one-run-per-path guarantee.
        let mut state = self.inner.state.lock();
        if let Some(next) = state.queued.remove(canonical) {
            drop(state);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.work(next, canonical.to_string()));
        } else {
            state.running.remove(canonical);
        }

        result
    }

    /// List one gallery directory, relative to the watched root.
    ///
    /// Folders come first, then images, each sorted by name. Hidden entries
    /// are skipped. Images missing from the store are indexed on demand; an
    /// image that fails to index is still listed, with no record.
    pub async fn list_directory(&self, rel: &str) -> Result<Vec<ListingEntry>, IndexerError> {
        let root = &self.inner.config.watch_root;
        let dir = if rel.is_empty() {
            root.clone()
        } else {
            if rel.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
                return Err(IndexerError::NotFound(root.join(rel)));
            }
            join_canonical(root, rel)
        };

        let meta = tokio::fs::metadata(&dir)
            .await
            .map_err(|_| IndexerError::NotFound(dir.clone()))?;
        if !meta.is_dir() {
            return Err(IndexerError::NotADirectory(dir));
        }

        let mut folders = Vec::new();
        let mut images = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let canonical = if rel.is_empty() {
                name.clone()
            } else {
                format!("{rel}/{name}")
            };

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                folders.push(ListingEntry::Folder {
                    name,
                    path: canonical,
                });
            } else {
                let ext = name
                    .rsplit_once('.')
                    .map(|(_, e)| e.to_ascii_lowercase())
                    .unwrap_or_default();
                if !self.inner.config.is_supported_extension(&ext) {
                    continue;
                }
                let record = match self.inner.store.get(&canonical)? {
                    Some(record) => Some(record),
                    None => self.process_path(&canonical).await.ok(),
                };
                images.push(ListingEntry::Image {
                    name,
                    path: canonical,
                    record,
                });
            }
        }

        folders.sort_by(|a, b| entry_name(a).cmp(entry_name(b)));
        images.sort_by(|a, b| entry_name(a).cmp(entry_name(b)));
        folders.extend(images);
        Ok(folders)
    }

    /// Wipe the store and re-index the whole tree.
    ///
    /// Failures are collected per file; one corrupt image never aborts the
    /// rebuild.
    pub async fn rescan(&self) -> Result<RescanSummary, IndexerError> {
        let started = Instant::now();
        self.inner.store.wipe()?;

        let root = self.inner.config.watch_root.clone();
        let extensions = self.inner.config.extensions.clone();
        let files = tokio::task::spawn_blocking(move || scanner::scan_images(&root, &extensions))
            .await
            .map_err(|e| IndexerError::Io(std::io::Error::other(e)))?;

        let mut indexed = 0;
        let mut failed = Vec::new();
        for file in files {
            let Some(canonical) = canonical_path(&self.inner.config.watch_root, &file) else {
                continue;
            };
            match self.process_path(&canonical).await {
                Ok(_) => indexed += 1,
                Err(e) => {
                    warn!(path = %canonical, error = %e, "Rescan skipped file");
                    failed.push((canonical, e.to_string()));
                }
            }
        }

        let summary = RescanSummary {
            indexed,
            failed,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            indexed = summary.indexed,
            failed = summary.failed.len(),
            duration_ms = summary.duration_ms,
            "Rescan complete"
        );
        Ok(summary)
    }
}

impl Inner {
    /// Run the event for a path, then drain anything queued behind it.
    ///
    /// The caller must have inserted the path into `running`.
    async fn work(self: Arc<Self>, mut kind: ChangeKind, canonical: String) {
        let permit = match Arc::clone(&self.jobs).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        loop {
            self.apply(kind, &canonical).await;
            let mut state = self.state.lock();
            match state.queued.remove(&canonical) {
                Some(next) => kind = next,
                None => {
                    state.running.remove(&canonical);
                    break;
                }
            }
        }
        drop(permit);
    }

    async fn apply(self: &Arc<Self>, kind: ChangeKind, canonical: &str) {
        match kind {
            ChangeKind::Created | ChangeKind::Modified => match self.process(canonical).await {
                Ok(_) => {}
                // The file vanished between the event and processing.
                Err(IndexerError::NotFound(_)) => self.remove(canonical).await,
                Err(e) => warn!(path = %canonical, error = %e, "Failed to process image"),
            },
            ChangeKind::Removed => self.remove(canonical).await,
        }
    }

    async fn process(self: &Arc<Self>, canonical: &str) -> Result<ImageRecord, IndexerError> {
        let inner = Arc::clone(self);
        let canonical = canonical.to_string();
        tokio::task::spawn_blocking(move || inner.process_sync(&canonical))
            .await
            .map_err(|e| IndexerError::Io(std::io::Error::other(e)))?
    }

    /// Full processing pipeline for one path. Blocking.
    fn process_sync(&self, canonical: &str) -> Result<ImageRecord, IndexerError> {
        let src = join_canonical(&self.config.watch_root, canonical);

        let meta = match std::fs::metadata(&src) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexerError::NotFound(src));
            }
            Err(e) => return Err(e.into()),
        };
        let mtime = epoch_secs(&meta);

        // Unchanged since last processing: the stored record is still valid.
        if let Some(existing) = self.store.get(canonical)? {
            if existing.source_modified_at == mtime {
                debug!(path = %canonical, "Record fresh, skipping");
                return Ok(existing);
            }
        }

        let extracted = extract::extract(&src, &self.config.extensions)?;
        let thumb = thumbnail_path(&self.config.thumbnail_root, canonical);
        thumbnail::generate(&src, &thumb, self.config.thumbnail_max_edge)?;

        let record = ImageRecord {
            canonical_path: canonical.to_string(),
            thumbnail_path: thumb.to_string_lossy().into_owned(),
            width: extracted.width,
            height: extracted.height,
            byte_size: extracted.byte_size,
            format: extracted.format,
            is_animated: extracted.is_animated,
            source_modified_at: mtime,
            exif: extracted.exif,
        };
        self.store.upsert(&record)?;

        info!(
            path = %canonical,
            width = record.width,
            height = record.height,
            format = %record.format,
            "Indexed image"
        );
        Ok(record)
    }

    /// Drop the record and its thumbnail. Both halves are best-effort.
    async fn remove(self: &Arc<Self>, canonical: &str) {
        if let Err(e) = self.store.delete(canonical) {
            warn!(path = %canonical, error = %e, "Failed to delete record");
        }
        let thumb = thumbnail_path(&self.config.thumbnail_root, canonical);
        match tokio::fs::remove_file(&thumb).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?thumb, error = %e, "Failed to remove thumbnail"),
        }
        info!(path = %canonical, "Removed image");
    }
}

fn entry_name(entry: &ListingEntry) -> &str {
    match entry {
        ListingEntry::Folder { name, .. } | ListingEntry::Image { name, .. } => name,
    }
}

fn epoch_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
