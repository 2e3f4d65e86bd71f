//! Persisted image cache store.
//!
//! A single-file SQLite database keyed by canonical path. Upserts are a
//! single replace-or-insert statement, so two concurrent writers for the
//! same key resolve to last-write-wins rather than partial state.

use crate::IndexerError;
use galerie_core::{ImageFormat, ImageRecord};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS images (
    path           TEXT PRIMARY KEY,
    thumbnail_path TEXT NOT NULL,
    width          INTEGER NOT NULL,
    height         INTEGER NOT NULL,
    size           INTEGER NOT NULL,
    format         TEXT NOT NULL,
    is_animated    INTEGER NOT NULL DEFAULT 0,
    last_modified  INTEGER NOT NULL,
    created_at     INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    exif           BLOB
);
";

/// Shared handle to the image store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given database path.
    ///
    /// Creates the parent directory and schema if absent; idempotent
    /// across restarts.
    pub fn open(path: &Path) -> Result<Self, IndexerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        info!(path = ?path, "Image store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, IndexerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Point lookup by canonical path.
    pub fn get(&self, canonical: &str) -> Result<Option<ImageRecord>, IndexerError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT path, thumbnail_path, width, height, size, format,
                        is_animated, last_modified, exif
                 FROM images WHERE path = ?1",
                params![canonical],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, bool>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, Option<Vec<u8>>>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((path, thumbnail_path, width, height, size, format, is_animated, mtime, exif)) =
            row
        else {
            return Ok(None);
        };

        let format = ImageFormat::parse(&format).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown image format: {format}").into(),
            )
        })?;

        Ok(Some(ImageRecord {
            canonical_path: path,
            thumbnail_path,
            width,
            height,
            byte_size: size,
            format,
            is_animated,
            source_modified_at: mtime,
            exif,
        }))
    }

    /// Insert or replace the record for its canonical path.
    ///
    /// A single statement: no check-then-write race. `created_at` is set on
    /// first insert and survives replacements.
    pub fn upsert(&self, record: &ImageRecord) -> Result<(), IndexerError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO images
                (path, thumbnail_path, width, height, size, format,
                 is_animated, last_modified, exif)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(path) DO UPDATE SET
                thumbnail_path = excluded.thumbnail_path,
                width          = excluded.width,
                height         = excluded.height,
                size           = excluded.size,
                format         = excluded.format,
                is_animated    = excluded.is_animated,
                last_modified  = excluded.last_modified,
                exif           = excluded.exif",
            params![
                record.canonical_path,
                record.thumbnail_path,
                record.width,
                record.height,
                record.byte_size,
                record.format.as_str(),
                record.is_animated,
                record.source_modified_at,
                record.exif,
            ],
        )?;

        debug!(path = %record.canonical_path, "Upserted record");

        Ok(())
    }

    /// Delete the record for a canonical path; no-op when absent.
    pub fn delete(&self, canonical: &str) -> Result<(), IndexerError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM images WHERE path = ?1", params![canonical])?;
        Ok(())
    }

    /// Drop all records. Used only for an explicit full rebuild.
    pub fn wipe(&self) -> Result<(), IndexerError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM images", [])?;
        info!("Store wiped for rebuild");
        Ok(())
    }

    /// Number of indexed images.
    pub fn count(&self) -> Result<u64, IndexerError> {
        let conn = self.conn.lock();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    /// All canonical paths, sorted.
    pub fn paths(&self) -> Result<Vec<String>, IndexerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path FROM images ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    /// Creation timestamp for a record (epoch seconds), if present.
    pub fn created_at(&self, canonical: &str) -> Result<Option<i64>, IndexerError> {
        let conn = self.conn.lock();
        let created = conn
            .query_row(
                "SELECT created_at FROM images WHERE path = ?1",
                params![canonical],
                |row| row.get(0),
            )
            .optional()?;
        Ok(created)
    }
}
