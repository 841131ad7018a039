//! Archive metadata extraction.
//!
//! [`extract`] reads an epub (a zip container) and returns its
//! [`BookMetadata`](crate::library::model::BookMetadata). Extraction is pure
//! and synchronous; callers on an async runtime should run it on the
//! blocking pool.

pub mod epub;
pub mod html;
pub mod xml;

use std::io::Cursor;

use crate::library::error::ExtractResult;
use crate::library::model::BookMetadata;

pub use epub::extract;

/// Extract metadata from an in-memory archive.
pub fn extract_bytes(data: &[u8]) -> ExtractResult<BookMetadata> {
    extract(Cursor::new(data))
}
