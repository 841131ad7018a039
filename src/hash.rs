//! Streaming content hash for book archives.
//!
//! A book's identity inside a share is the SHA-256 of its archive bytes,
//! rendered as multibase base32-lower (`b` prefix, RFC 4648 alphabet,
//! lowercase, unpadded). This is the same textual form the document store
//! uses for attachment hashes, so the value is safe to embed in paths.

use std::io::Read;

use multibase::Base;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bytes pulled from a reader per `update` call.
const CHUNK_SIZE: usize = 64 * 1024;

/// Textual SHA-256 content hash of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap an already-rendered hash, e.g. one parsed out of a storage path.
    ///
    /// No validation is performed; use [`is_well_formed`](Self::is_well_formed)
    /// when the origin is untrusted.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the text decodes as a 32-byte base32-lower multibase digest.
    pub fn is_well_formed(&self) -> bool {
        matches!(
            multibase::decode(&self.0),
            Ok((Base::Base32Lower, digest)) if digest.len() == 32
        )
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental hasher. Feed chunks with [`update`](Self::update), then
/// [`finish`](Self::finish).
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    digest: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.digest.update(chunk);
    }

    pub fn finish(self) -> ContentHash {
        let digest = self.digest.finalize();
        ContentHash(multibase::encode(Base::Base32Lower, digest))
    }
}

/// Hash everything a reader yields without holding more than one chunk.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<ContentHash> {
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finish()
}
