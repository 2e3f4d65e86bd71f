//! Daemon lifecycle management.

use anyhow::{Context, Result};
use galerie_core::GalleryConfig;
use galerie_indexer::{FileWatcher, Indexer, Store};
use tokio::sync::mpsc;

use crate::signals;

/// The main daemon process
pub struct Daemon {
    config: GalleryConfig,
    store: Store,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: GalleryConfig) -> Result<Self> {
        config
            .ensure_dirs()
            .context("Failed to create data directories")?;

        let store = Store::open(&config.db_path).context("Failed to open image store")?;

        Ok(Self { config, store })
    }

    /// Run until a shutdown signal arrives or the watcher fails for good.
    pub async fn run(&self, rebuild: bool) -> Result<()> {
        tracing::info!(
            root = %self.config.watch_root.display(),
            thumbnails = %self.config.thumbnail_root.display(),
            db = %self.config.db_path.display(),
            "Daemon starting"
        );

        let indexer = Indexer::new(self.config.clone(), self.store.clone());

        if rebuild {
            let summary = indexer.rescan().await.context("Full rebuild failed")?;
            tracing::info!(
                indexed = summary.indexed,
                failed = summary.failed.len(),
                "Rebuild finished"
            );
        }

        let (tx, rx) = mpsc::channel(1024);
        let watcher = FileWatcher::new(&self.config);

        let watch_task = tokio::spawn(watcher.run(tx));
        let index_task = {
            let indexer = indexer.clone();
            tokio::spawn(async move { indexer.run(rx).await })
        };

        let outcome = tokio::select! {
            result = watch_task => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::Error::from(e).context("Watcher failed")),
                Err(e) => Err(anyhow::anyhow!("Watcher task panicked: {e}")),
            },
            _ = signals::wait_for_shutdown() => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
        };

        index_task.abort();
        tracing::info!(
            indexed = self.store.count().unwrap_or(0),
            "Daemon stopped"
        );
        outcome
    }
}
