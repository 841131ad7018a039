// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # bookshare
//!
//! A derived e-book catalog over replicated document shares.
//!
//! Books are epub archives stored as attachments at
//! `/books/~{uploader}/{hash}/doc.epub` inside a share. Each share gets a
//! [`BookCatalog`](library::BookCatalog) that watches the share's documents
//! and keeps an in-memory index of book metadata up to date.
//!
//! ## Architecture
//!
//! - **Extraction** (`library::parser`): zip container → `container.xml` →
//!   package document → title, creators, language, identifiers, date, cover
//! - **Hashing** (`hash`): streaming SHA-256 rendered as base32 multibase
//! - **Catalog** (`library::catalog`): single-writer index over backfill and
//!   live event streams
//! - **Registry** (`registry`): one catalog per share, following settings
//! - **Store** (`store`): the replica/peer traits plus in-memory drivers
//!
//! ## Library usage
//!
//! ```no_run
//! # async fn demo() -> bookshare::library::CatalogResult<()> {
//! use std::sync::Arc;
//!
//! use bookshare::identity::{AuthorKeypair, ShareAddress};
//! use bookshare::library::{BookCatalog, CatalogConfig};
//! use bookshare::store::MemoryReplica;
//!
//! let replica = Arc::new(MemoryReplica::new(ShareAddress::new("+books.bxyz")));
//! let catalog = BookCatalog::open(replica, CatalogConfig::default());
//!
//! let author = AuthorKeypair::new("@suzy.bxyz", "secret");
//! let file = tokio::fs::File::open("novel.epub").await.map_err(|source| {
//!     bookshare::library::CatalogError::Read { source }
//! })?;
//! let key = catalog.add_book(&author, file).await?;
//! catalog.settled().await;
//! assert!(catalog.book(&key).is_some());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod hash;
pub mod identity;
pub mod library;
pub mod paths;
pub mod registry;
pub mod settings;
pub mod store;
