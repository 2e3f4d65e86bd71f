//! Galerie Daemon
//!
//! Background process that keeps a gallery's image index and thumbnails
//! synchronized with a directory tree.

mod daemon;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use galerie_core::GalleryConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use daemon::Daemon;

#[derive(Parser, Debug)]
#[command(name = "galerie-daemon", version, about = "Image gallery indexing daemon")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory tree to watch for images
    #[arg(long)]
    root: Option<PathBuf>,

    /// Root for generated thumbnails
    #[arg(long)]
    thumbnails: Option<PathBuf>,

    /// SQLite database file
    #[arg(long)]
    db: Option<PathBuf>,

    /// Wipe the store and re-index everything before watching
    #[arg(long)]
    rebuild: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<GalleryConfig> {
    let mut config = match &cli.config {
        Some(path) => GalleryConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GalleryConfig::default(),
    };

    // Command line flags win over the file
    if let Some(root) = &cli.root {
        config.watch_root = root.clone();
    }
    if let Some(thumbnails) = &cli.thumbnails {
        config.thumbnail_root = thumbnails.clone();
    }
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting Galerie daemon v{}", env!("CARGO_PKG_VERSION"));

    // Run async runtime
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let daemon = Daemon::new(config)?;
            daemon.run(cli.rebuild).await
        })
}
