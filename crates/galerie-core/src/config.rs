//! Configuration for the Galerie daemon.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Gallery daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryConfig {
    /// Directory tree to watch for images
    #[serde(default = "default_watch_root")]
    pub watch_root: PathBuf,

    /// Root under which thumbnails mirror the source tree
    #[serde(default = "default_thumbnail_root")]
    pub thumbnail_root: PathBuf,

    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Lowercase file extensions treated as images
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Longer edge of generated thumbnails, in pixels
    #[serde(default = "default_thumbnail_max_edge")]
    pub thumbnail_max_edge: u32,

    /// Quiet period a file's size/mtime must hold before an event is emitted
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,

    /// Poll cadence while waiting for a file to become stable
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum concurrent processing workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Watcher restarts allowed before the error becomes fatal
    #[serde(default = "default_max_restarts")]
    pub watcher_max_restarts: u32,

    /// Bound on the watcher's initial scan before it is restarted
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_watch_root() -> PathBuf {
    PathBuf::from("public/images")
}

fn default_thumbnail_root() -> PathBuf {
    PathBuf::from("public/thumbnails")
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("galerie")
        .join("gallery.db")
}

fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_thumbnail_max_edge() -> u32 {
    400
}

fn default_stability_window_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_workers() -> usize {
    4
}

fn default_max_restarts() -> u32 {
    3
}

fn default_ready_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            watch_root: default_watch_root(),
            thumbnail_root: default_thumbnail_root(),
            db_path: default_db_path(),
            extensions: default_extensions(),
            thumbnail_max_edge: default_thumbnail_max_edge(),
            stability_window_ms: default_stability_window_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            workers: default_workers(),
            watcher_max_restarts: default_max_restarts(),
            ready_timeout_secs: default_ready_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl GalleryConfig {
    /// Load configuration from a YAML file.
    pub fn load_from(path: &PathBuf) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| CoreError::InvalidConfig(e.to_string()))
    }

    /// Whether a lowercase extension is in the supported set.
    pub fn is_supported_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }

    /// Ensure the thumbnail root and database directory exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.thumbnail_root)?;
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GalleryConfig::default();
        assert_eq!(config.thumbnail_max_edge, 400);
        assert_eq!(config.stability_window_ms, 1000);
        assert_eq!(config.poll_interval_ms, 100);
        assert!(config.is_supported_extension("jpg"));
        assert!(!config.is_supported_extension("heic"));
    }

    #[test]
    fn test_config_serialization() {
        let config = GalleryConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GalleryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.watch_root, parsed.watch_root);
        assert_eq!(config.extensions, parsed.extensions);
    }

    #[test]
    fn test_load_from_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "watch_root: /srv/photos\nworkers: 8\n").unwrap();

        let config = GalleryConfig::load_from(&path).unwrap();
        assert_eq!(config.watch_root, PathBuf::from("/srv/photos"));
        assert_eq!(config.workers, 8);
        // Unset fields fall back to defaults
        assert_eq!(config.thumbnail_max_edge, 400);
    }

    #[test]
    fn test_load_from_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "workers: [not a number").unwrap();

        assert!(GalleryConfig::load_from(&path).is_err());
    }
}
