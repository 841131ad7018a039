//! Document-store abstraction consumed by the catalog.
//!
//! The store itself (replication, signing, conflict resolution, transport)
//! lives outside this crate. Bookshare only needs:
//!
//! - [`Replica`]: one share's documents, their attachments, an attachment
//!   ingestion stream and a path-filtered query stream;
//! - [`Peer`]: attaches/detaches replicas per share and starts sync.
//!
//! [`mem`] provides in-memory implementations of both.

pub mod mem;

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub use crate::error::{StoreError, StoreResult};
use crate::identity::{AuthorAddress, AuthorKeypair, ShareAddress};

pub use mem::{MemoryPeer, MemoryReplica};

/// A document as observed in a replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doc {
    pub share: ShareAddress,
    pub path: String,
    pub author: AuthorAddress,
    pub text: String,
    /// Size of the attachment in bytes, `None` if the doc has no attachment.
    pub attachment_size: Option<u64>,
    /// Content hash of the attachment as rendered by the store.
    pub attachment_hash: Option<String>,
    /// Microseconds, monotonic per replica.
    pub timestamp: u64,
}

impl Doc {
    /// A wiped document: empty text and an empty attachment.
    pub fn is_tombstone(&self) -> bool {
        self.text.is_empty() && self.attachment_size == Some(0)
    }
}

/// Input for [`Replica::set`].
#[derive(Debug, Clone)]
pub struct DocInput {
    pub path: String,
    pub text: String,
    pub attachment: Option<Bytes>,
}

/// Locally available attachment bytes.
#[derive(Debug, Clone)]
pub struct Attachment {
    data: Bytes,
}

impl Attachment {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// The whole attachment. Cheap: shares the underlying buffer.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// A seekable reader over the attachment.
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.data.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Events on a replica's ingestion stream.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// A document was accepted.
    Success(Doc),
    /// An attachment for `doc` was accepted into storage.
    AttachmentIngest(Doc),
    /// A write was rejected.
    Failure { path: String, reason: String },
}

/// Events on a path-filtered query stream.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    /// A matching document that existed when the stream was opened.
    Existing(Doc),
    /// Backfill is complete; live events follow.
    ProcessedAllExisting,
    /// A matching document was written after the stream opened.
    Success(Doc),
    /// An ephemeral document expired.
    Expire(Doc),
}

/// Path filter for [`Replica::query_stream`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub path_starts_with: Option<String>,
    pub path_ends_with: Option<String>,
}

impl QueryFilter {
    pub fn matches(&self, path: &str) -> bool {
        self.path_starts_with
            .as_deref()
            .is_none_or(|prefix| path.starts_with(prefix))
            && self
                .path_ends_with
                .as_deref()
                .is_none_or(|suffix| path.ends_with(suffix))
    }
}

/// One share's document store.
#[async_trait]
pub trait Replica: Send + Sync {
    fn share(&self) -> &ShareAddress;

    /// Write a document signed by `author`.
    async fn set(&self, author: &AuthorKeypair, input: DocInput) -> StoreResult<Doc>;

    async fn latest_doc_at_path(&self, path: &str) -> StoreResult<Option<Doc>>;

    /// Fetch a doc's attachment. `Ok(None)` when the doc has none or it has
    /// not arrived yet.
    async fn attachment(&self, doc: &Doc) -> StoreResult<Option<Attachment>>;

    /// Overwrite the document at `path` with a tombstone. No-op if there is
    /// no document there.
    async fn wipe_doc_at_path(&self, author: &AuthorKeypair, path: &str) -> StoreResult<()>;

    /// Live ingestion events from the moment of the call.
    fn ingest_events(&self) -> BoxStream<'static, IngestEvent>;

    /// Existing matching documents, then [`QueryEvent::ProcessedAllExisting`],
    /// then live matching writes.
    fn query_stream(&self, filter: QueryFilter) -> BoxStream<'static, QueryEvent>;

    /// Close the replica; `erase` drops its data as well. Streams end.
    async fn close(&self, erase: bool) -> StoreResult<()>;
}

/// Owner of per-share replicas and of sync with remote servers.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Open (or reuse) the replica for `share`.
    async fn attach(
        &self,
        share: &ShareAddress,
        secret: Option<&str>,
    ) -> StoreResult<Arc<dyn Replica>>;

    /// Stop tracking the replica for `share`.
    fn detach(&self, share: &ShareAddress);

    /// Start syncing all attached replicas with `server`.
    async fn sync(&self, server: &str) -> StoreResult<()>;
}
