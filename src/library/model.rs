//! Core data types for the book catalog.
//!
//! A book is identified by who uploaded it and the content hash of its
//! archive. The same pair is encoded in the document path the archive is
//! stored at, so a [`BookKey`] can always be recovered from a [`BookPath`].

use std::sync::LazyLock;

use bytes::Bytes;
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::hash::ContentHash;
use crate::identity::AuthorAddress;

/// A `(scheme, value)` identifier such as `("ISBN", "9780...")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identifier {
    pub scheme: String,
    pub value: String,
}

impl Identifier {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }
}

/// Cover image bytes pulled out of the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cover {
    #[serde(skip)]
    pub bytes: Bytes,
    /// Set when the manifest item points straight at an image.
    pub mime_type: Option<String>,
}

/// Bibliographic metadata read from an archive's package document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookMetadata {
    pub title: String,
    /// `None` when the package lists no creators.
    pub creators: Option<Vec<String>>,
    pub language: String,
    /// Never empty.
    pub identifiers: Vec<Identifier>,
    pub publication_date: Option<NaiveDate>,
    pub cover: Option<Cover>,
}

impl BookMetadata {
    /// One-line description stored as the text of the book's document.
    pub fn summary(&self) -> String {
        let by = match &self.creators {
            Some(creators) if !creators.is_empty() => creators.join(", "),
            _ => "unknown".to_string(),
        };
        format!("Epub: {} by {by}", self.title)
    }
}

/// Identity of one archive version from one uploader.
///
/// Byte-identical archives from different uploaders are different books.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BookKey {
    pub uploader: AuthorAddress,
    pub hash: ContentHash,
}

impl BookKey {
    pub fn new(uploader: AuthorAddress, hash: ContentHash) -> Self {
        Self { uploader, hash }
    }

    /// Document path the archive for this key is stored at.
    pub fn path(&self) -> BookPath {
        BookPath {
            uploader: self.uploader.clone(),
            hash: self.hash.clone(),
        }
    }
}

impl std::fmt::Display for BookKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.uploader, self.hash)
    }
}

/// A catalog row: metadata plus the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub uploader: AuthorAddress,
    pub hash: ContentHash,
    #[serde(flatten)]
    pub metadata: BookMetadata,
}

impl CatalogEntry {
    pub fn key(&self) -> BookKey {
        BookKey::new(self.uploader.clone(), self.hash.clone())
    }
}

static BOOK_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/books/~([^/]+)/([^/]+)/doc\.epub$").expect("book path pattern is valid")
});

/// `/books/~{uploader}/{hash}/doc.epub`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookPath {
    pub uploader: AuthorAddress,
    pub hash: ContentHash,
}

impl BookPath {
    /// Prefix shared by every book path.
    pub const PREFIX: &'static str = "/books/~";
    /// Suffix shared by every book path.
    pub const SUFFIX: &'static str = "/doc.epub";

    pub fn new(uploader: AuthorAddress, hash: ContentHash) -> Self {
        Self { uploader, hash }
    }

    /// Split a document path on the book template. Anything with extra
    /// segments or a different suffix is not a book.
    pub fn parse(path: &str) -> Option<Self> {
        let caps = BOOK_PATH.captures(path)?;
        Some(Self {
            uploader: AuthorAddress::new(&caps[1]),
            hash: ContentHash::new(&caps[2]),
        })
    }

    pub fn key(&self) -> BookKey {
        BookKey::new(self.uploader.clone(), self.hash.clone())
    }
}

impl std::fmt::Display for BookPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}/{}{}",
            Self::PREFIX,
            self.uploader,
            self.hash,
            Self::SUFFIX
        )
    }
}
