//! Identity types shared by the store, the catalog and the registry.
//!
//! Addresses are opaque strings owned by the document store. Author addresses
//! look like `@suzy.b3kxcquc...`, share addresses like `+books.bz7c...`. The
//! catalog never interprets them beyond equality and path rendering.

use serde::{Deserialize, Serialize};

/// Public address of an author (the uploader identity of a book).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorAddress(String);

impl AuthorAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthorAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthorAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An author's address together with the secret used to sign writes.
///
/// Signing itself is the store's concern; the catalog only forwards the
/// keypair to [`Replica::set`](crate::store::Replica::set).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorKeypair {
    pub address: AuthorAddress,
    pub secret: String,
}

impl AuthorKeypair {
    pub fn new(address: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            address: AuthorAddress::new(address),
            secret: secret.into(),
        }
    }
}

// Keep secrets out of logs.
impl std::fmt::Debug for AuthorKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorKeypair")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Address of a share (an isolated document-store namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareAddress(String);

impl ShareAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShareAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShareAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
