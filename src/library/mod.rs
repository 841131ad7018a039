//! E-book library: metadata extraction and the per-share catalog.
//!
//! Archives live in a share as attachments at
//! `/books/~{uploader}/{hash}/doc.epub`. The [`parser`] turns archive bytes
//! into [`BookMetadata`]; the [`catalog`] keeps an index of every book in a
//! share up to date as documents arrive.

pub mod catalog;
pub mod error;
pub mod model;
pub mod parser;

pub use catalog::{BookCatalog, CatalogConfig, CatalogSubscription};
pub use error::{CatalogError, CatalogResult, ExtractError, ExtractResult};
pub use model::{BookKey, BookMetadata, BookPath, CatalogEntry, Cover, Identifier};
pub use parser::{extract, extract_bytes};
