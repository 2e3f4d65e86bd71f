//! File system watcher for the image tree.
//!
//! Wraps a debounced notify watcher with the gallery's filtering rules and a
//! write-stability window: Created/Modified events are only emitted once a
//! file's size and mtime have held still for a quiet period, so a file that
//! is still being copied is never processed mid-write.
//!
//! On startup every pre-existing image is emitted as a synthetic `Created`
//! event before the watcher reports ready, giving bulk and incremental
//! updates one code path. A stalled initial scan, or a watcher fault, tears
//! the watch down and restarts it with backoff, a bounded number of times.

use crate::scanner;
use crate::IndexerError;
use galerie_core::{canonical_path, GalleryConfig};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Debounce applied to raw notify events before stability polling.
const RAW_DEBOUNCE: Duration = Duration::from_millis(200);

/// Cap on stability polling for a file that never settles.
const MAX_STABILITY_POLLS: u32 = 120;

/// Kind of path change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A change event for one image, carrying its canonical path.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: String,
}

enum RawChange {
    Event { kind: ChangeKind, path: PathBuf },
    Fault(String),
}

/// Watches the image tree and emits filtered, stabilized change events.
#[derive(Clone)]
pub struct FileWatcher {
    root: PathBuf,
    thumbnail_root: PathBuf,
    extensions: Vec<String>,
    stability_window: Duration,
    poll_interval: Duration,
    ready_timeout: Duration,
    max_restarts: u32,
}

impl FileWatcher {
    pub fn new(config: &GalleryConfig) -> Self {
        Self {
            root: config.watch_root.clone(),
            thumbnail_root: config.thumbnail_root.clone(),
            extensions: config.extensions.clone(),
            stability_window: Duration::from_millis(config.stability_window_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            max_restarts: config.watcher_max_restarts,
        }
    }

    /// Run the watch until the event receiver is dropped.
    ///
    /// Watcher faults restart the watch with linear backoff; once the
    /// restart budget is exhausted the last error is returned.
    pub async fn run(self, tx: mpsc::Sender<ChangeEvent>) -> Result<(), IndexerError> {
        let mut attempts = 0u32;
        loop {
            match self.watch_once(&tx).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempts += 1;
                    if attempts > self.max_restarts {
                        error!(error = %e, attempts, "Watcher restart budget exhausted");
                        return Err(e);
                    }
                    warn!(error = %e, attempt = attempts, "Watcher failed, restarting");
                    tokio::time::sleep(Duration::from_secs(attempts as u64)).await;
                }
            }
        }
    }

    async fn watch_once(&self, tx: &mpsc::Sender<ChangeEvent>) -> Result<(), IndexerError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<RawChange>(1024);

        let event_tx = raw_tx.clone();
        let mut debouncer =
            new_debouncer(RAW_DEBOUNCE, None, move |result: DebounceEventResult| {
                match result {
                    Ok(events) => {
                        for event in events {
                            for raw in convert_event(&event.event) {
                                let _ = event_tx.blocking_send(raw);
                            }
                        }
                    }
                    Err(errors) => {
                        for e in errors {
                            let _ = event_tx.blocking_send(RawChange::Fault(e.to_string()));
                        }
                    }
                }
            })
            .map_err(|e| IndexerError::Watcher(e.to_string()))?;

        debouncer
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e: notify::Error| IndexerError::Watcher(e.to_string()))?;
        drop(raw_tx);

        // Synthetic Created events for everything already present; a scan
        // that does not finish in time tears the watch down.
        tokio::time::timeout(self.ready_timeout, self.initial_scan(tx))
            .await
            .map_err(|_| {
                IndexerError::Watcher(format!(
                    "initial scan of {} did not complete in time",
                    self.root.display()
                ))
            })??;

        info!(root = ?self.root, "Watcher ready");

        while let Some(raw) = raw_rx.recv().await {
            match raw {
                RawChange::Fault(message) => return Err(IndexerError::Watcher(message)),
                RawChange::Event { kind, path } => {
                    let Some(canonical) = self.accepts(&path) else {
                        continue;
                    };
                    match kind {
                        ChangeKind::Removed => {
                            if tx
                                .send(ChangeEvent {
                                    kind,
                                    path: canonical,
                                })
                                .await
                                .is_err()
                            {
                                return Ok(());
                            }
                        }
                        ChangeKind::Created | ChangeKind::Modified => {
                            // Stability wait runs off the loop so one slow
                            // copy does not delay other paths.
                            let watcher = self.clone();
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                if watcher.await_stable(&path).await {
                                    let _ = tx
                                        .send(ChangeEvent {
                                            kind,
                                            path: canonical,
                                        })
                                        .await;
                                }
                            });
                        }
                    }
                }
            }
        }

        // All raw senders gone means the debouncer died without reporting
        Err(IndexerError::Watcher("watch stream ended".to_string()))
    }

    async fn initial_scan(&self, tx: &mpsc::Sender<ChangeEvent>) -> Result<(), IndexerError> {
        let root = self.root.clone();
        let extensions = self.extensions.clone();
        let files = tokio::task::spawn_blocking(move || scanner::scan_images(&root, &extensions))
            .await
            .map_err(|e| IndexerError::Watcher(e.to_string()))?;

        let mut emitted = 0usize;
        for abs in files {
            let Some(canonical) = self.accepts(&abs) else {
                continue;
            };
            if !self.await_stable(&abs).await {
                debug!(path = ?abs, "File vanished or never settled during initial scan");
                continue;
            }
            if tx
                .send(ChangeEvent {
                    kind: ChangeKind::Created,
                    path: canonical,
                })
                .await
                .is_err()
            {
                return Ok(());
            }
            emitted += 1;
        }

        info!(count = emitted, "Initial scan complete");
        Ok(())
    }

    /// Canonical path for an accepted file, or `None` when filtered out.
    ///
    /// Filters hidden entries, non-image extensions, and anything under the
    /// thumbnail root (which may be nested inside the watched tree).
    fn accepts(&self, path: &Path) -> Option<String> {
        if path.starts_with(&self.thumbnail_root) {
            return None;
        }
        let canonical = canonical_path(&self.root, path)?;
        if canonical.split('/').any(|part| part.starts_with('.')) {
            return None;
        }
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !self.extensions.iter().any(|e| e == &ext) {
            return None;
        }
        Some(canonical)
    }

    /// Wait until the file's size and mtime hold still for the stability
    /// window. Returns false when the file vanishes or never settles.
    async fn await_stable(&self, abs: &Path) -> bool {
        let mut last: Option<(u64, SystemTime)> = None;
        let mut held = Duration::ZERO;

        for _ in 0..MAX_STABILITY_POLLS {
            let meta = match tokio::fs::metadata(abs).await {
                Ok(meta) => meta,
                Err(_) => return false,
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let sample = (meta.len(), modified);

            // A file whose mtime already predates the window is settled.
            if let Ok(age) = SystemTime::now().duration_since(modified) {
                if age >= self.stability_window {
                    return true;
                }
            }

            match last {
                Some(prev) if prev == sample => {
                    held += self.poll_interval;
                    if held >= self.stability_window {
                        return true;
                    }
                }
                _ => held = Duration::ZERO,
            }
            last = Some(sample);

            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(path = ?abs, "File never settled, skipping");
        false
    }
}

/// Map a notify event to raw changes, dropping the kinds we ignore.
///
/// A rename carrying both names splits into a removal of the old path and a
/// creation of the new one. A rename whose direction is unknown maps to both
/// kinds for the same path: the removal clears any stale record and the
/// creation only survives the stability wait when the file actually exists.
fn convert_event(event: &Event) -> Vec<RawChange> {
    let mut changes = Vec::new();
    let mut push = |kind: ChangeKind, path: Option<&PathBuf>| {
        if let Some(path) = path {
            changes.push(RawChange::Event {
                kind,
                path: path.clone(),
            });
        }
    };

    match &event.kind {
        EventKind::Create(_) => push(ChangeKind::Created, event.paths.first()),
        EventKind::Remove(_) => push(ChangeKind::Removed, event.paths.first()),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => {
                push(ChangeKind::Removed, event.paths.first());
                push(ChangeKind::Created, event.paths.get(1));
            }
            RenameMode::From => push(ChangeKind::Removed, event.paths.first()),
            RenameMode::To => push(ChangeKind::Created, event.paths.first()),
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    push(ChangeKind::Removed, Some(path));
                    push(ChangeKind::Created, Some(path));
                }
            }
        },
        EventKind::Modify(_) => push(ChangeKind::Modified, event.paths.first()),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> GalleryConfig {
        GalleryConfig {
            watch_root: root.to_path_buf(),
            thumbnail_root: root.join("thumbnails"),
            stability_window_ms: 100,
            poll_interval_ms: 20,
            ..GalleryConfig::default()
        }
    }

    #[test]
    fn test_accepts_filters() {
        let dir = tempdir().unwrap();
        let watcher = FileWatcher::new(&test_config(dir.path()));

        assert_eq!(
            watcher.accepts(&dir.path().join("a/photo.jpg")),
            Some("a/photo.jpg".to_string())
        );
        // Hidden entries
        assert!(watcher.accepts(&dir.path().join(".hidden.jpg")).is_none());
        assert!(watcher.accepts(&dir.path().join(".cache/x.jpg")).is_none());
        // Non-image extension
        assert!(watcher.accepts(&dir.path().join("notes.txt")).is_none());
        // Thumbnail output must never feed back into the watch
        assert!(watcher
            .accepts(&dir.path().join("thumbnails/a/photo.jpg"))
            .is_none());
        // Outside the root
        assert!(watcher.accepts(Path::new("/elsewhere/photo.jpg")).is_none());
    }

    #[test]
    fn test_accepts_uppercase_extension() {
        let dir = tempdir().unwrap();
        let watcher = FileWatcher::new(&test_config(dir.path()));
        assert_eq!(
            watcher.accepts(&dir.path().join("SHOT.JPG")),
            Some("SHOT.JPG".to_string())
        );
    }

    fn kinds_of(event: &Event) -> Vec<(ChangeKind, PathBuf)> {
        convert_event(event)
            .into_iter()
            .map(|raw| match raw {
                RawChange::Event { kind, path } => (kind, path),
                RawChange::Fault(message) => panic!("unexpected fault: {message}"),
            })
            .collect()
    }

    #[test]
    fn test_convert_event_kinds() {
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("test.jpg")],
            attrs: Default::default(),
        };
        assert_eq!(
            kinds_of(&event),
            vec![(ChangeKind::Created, PathBuf::from("test.jpg"))]
        );

        let event = Event {
            kind: EventKind::Access(notify::event::AccessKind::Read),
            paths: vec![PathBuf::from("test.jpg")],
            attrs: Default::default(),
        };
        assert!(convert_event(&event).is_empty());
    }

    #[test]
    fn test_convert_rename_splits_into_remove_and_create() {
        // The debouncer reports a rename as one event with both names
        let event = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("old.jpg"), PathBuf::from("new.jpg")],
            attrs: Default::default(),
        };
        assert_eq!(
            kinds_of(&event),
            vec![
                (ChangeKind::Removed, PathBuf::from("old.jpg")),
                (ChangeKind::Created, PathBuf::from("new.jpg")),
            ]
        );
    }

    #[test]
    fn test_convert_rename_halves() {
        let event = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            paths: vec![PathBuf::from("old.jpg")],
            attrs: Default::default(),
        };
        assert_eq!(
            kinds_of(&event),
            vec![(ChangeKind::Removed, PathBuf::from("old.jpg"))]
        );

        let event = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            paths: vec![PathBuf::from("new.jpg")],
            attrs: Default::default(),
        };
        assert_eq!(
            kinds_of(&event),
            vec![(ChangeKind::Created, PathBuf::from("new.jpg"))]
        );
    }

    #[test]
    fn test_convert_rename_unknown_direction_maps_to_both_kinds() {
        let event = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            paths: vec![PathBuf::from("moved.jpg")],
            attrs: Default::default(),
        };
        assert_eq!(
            kinds_of(&event),
            vec![
                (ChangeKind::Removed, PathBuf::from("moved.jpg")),
                (ChangeKind::Created, PathBuf::from("moved.jpg")),
            ]
        );
    }

    #[tokio::test]
    async fn test_await_stable_settled_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.jpg");
        std::fs::write(&path, "data").unwrap();
        // Let its age exceed the 100ms window
        tokio::time::sleep(Duration::from_millis(150)).await;

        let watcher = FileWatcher::new(&test_config(dir.path()));
        assert!(watcher.await_stable(&path).await);
    }

    #[tokio::test]
    async fn test_await_stable_missing_file() {
        let dir = tempdir().unwrap();
        let watcher = FileWatcher::new(&test_config(dir.path()));
        assert!(!watcher.await_stable(&dir.path().join("ghost.jpg")).await);
    }

    #[tokio::test]
    async fn test_initial_scan_emits_created_events() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        RgbaImage::new(4, 4)
            .save(dir.path().join("a/one.png"))
            .unwrap();
        RgbaImage::new(4, 4)
            .save(dir.path().join("two.png"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let watcher = FileWatcher::new(&test_config(dir.path()));
        let (tx, mut rx) = mpsc::channel(16);
        watcher.initial_scan(&tx).await.unwrap();
        drop(tx);

        let mut paths = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.kind, ChangeKind::Created);
            paths.push(event.path);
        }
        assert_eq!(paths, vec!["a/one.png", "two.png"]);
    }

    #[tokio::test]
    async fn test_watcher_detects_new_file() {
        let dir = tempdir().unwrap();
        let watcher = FileWatcher::new(&test_config(dir.path()));
        let (tx, mut rx) = mpsc::channel(16);

        let handle = tokio::spawn(watcher.run(tx));

        // Give the watch time to establish, then drop a file in
        tokio::time::sleep(Duration::from_millis(300)).await;
        RgbaImage::new(4, 4)
            .save(dir.path().join("fresh.png"))
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert_eq!(event.path, "fresh.png");
        assert!(matches!(
            event.kind,
            ChangeKind::Created | ChangeKind::Modified
        ));

        drop(rx);
        handle.abort();
    }

    #[tokio::test]
    async fn test_watcher_rename_removes_old_and_creates_new() {
        let dir = tempdir().unwrap();
        RgbaImage::new(4, 4)
            .save(dir.path().join("old.png"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let watcher = FileWatcher::new(&test_config(dir.path()));
        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(watcher.run(tx));

        // Initial scan reports the file first
        let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no initial event")
            .expect("channel closed");
        assert_eq!(first.path, "old.png");
        assert_eq!(first.kind, ChangeKind::Created);

        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::rename(dir.path().join("old.png"), dir.path().join("new.png")).unwrap();

        // The rename must surface as a removal of the old name and a
        // creation of the new one, in either order
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        while !(seen.contains(&(ChangeKind::Removed, "old.png".to_string()))
            && seen.contains(&(ChangeKind::Created, "new.png".to_string())))
        {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("rename events not observed in time")
                .expect("channel closed");
            seen.push((event.kind, event.path));
        }

        drop(rx);
        handle.abort();
    }

    #[tokio::test]
    async fn test_run_fails_after_restart_budget() {
        let dir = tempdir().unwrap();
        let mut config = test_config(&dir.path().join("missing"));
        config.watcher_max_restarts = 1;
        let watcher = FileWatcher::new(&config);
        let (tx, _rx) = mpsc::channel(4);

        // One restart with backoff, then the error becomes fatal
        let result = tokio::time::timeout(Duration::from_secs(15), watcher.run(tx))
            .await
            .expect("run did not give up in time");
        assert!(matches!(result, Err(IndexerError::Watcher(_))));
    }

    #[tokio::test]
    async fn test_run_tears_down_on_stalled_initial_scan() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.ready_timeout_secs = 0;
        config.watcher_max_restarts = 0;
        let watcher = FileWatcher::new(&config);
        let (tx, _rx) = mpsc::channel(4);

        let err = tokio::time::timeout(Duration::from_secs(10), watcher.run(tx))
            .await
            .expect("run did not give up in time")
            .unwrap_err();
        match err {
            IndexerError::Watcher(message) => assert!(message.contains("did not complete")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
