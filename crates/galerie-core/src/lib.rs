//! Galerie Core Components
//!
//! This crate provides the shared pieces of the Galerie gallery daemon:
//! the image record data model, canonical path mapping, and configuration.

mod config;
mod error;
mod record;

pub use config::GalleryConfig;
pub use error::CoreError;
pub use record::{canonical_path, join_canonical, thumbnail_path, ImageFormat, ImageRecord};
