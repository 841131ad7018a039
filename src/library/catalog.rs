//! Per-share book catalog.
//!
//! A [`BookCatalog`] is an in-memory index derived from one replica. It
//! listens to two event sources, the replica's ingestion stream and a query
//! stream over book paths (backfill, then live tail), and keeps a map from
//! [`BookKey`] to [`CatalogEntry`].
//!
//! One worker task owns all mutation. It drains both streams and a command
//! queue with a biased `select!`, so events are handled strictly one at a
//! time and [`BookCatalog::settled`] only resolves once every event already
//! delivered has been applied.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::hash::{ContentHash, ContentHasher};
use crate::identity::{AuthorAddress, AuthorKeypair, ShareAddress};
use crate::library::error::{CatalogError, CatalogResult, ExtractResult};
use crate::library::model::{BookKey, BookMetadata, BookPath, CatalogEntry};
use crate::library::parser;
use crate::store::{Doc, DocInput, IngestEvent, QueryEvent, QueryFilter, Replica};

/// Bytes reserved per read while buffering an upload.
const READ_CHUNK: usize = 64 * 1024;

/// Tuning for a [`BookCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Upper bound on fetching one attachment while indexing. A fetch that
    /// takes longer is treated like a missing attachment.
    pub fetch_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;

/// State shared between the catalog handle and its worker.
struct Shared {
    share: ShareAddress,
    books: RwLock<HashMap<BookKey, Arc<CatalogEntry>>>,
    subscribers: Mutex<HashMap<u64, Callback>>,
    next_subscriber: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    /// Insert or replace an entry. Returns `false` once the catalog is
    /// closed; the check happens under the write lock so nothing lands
    /// after `close`.
    fn insert(&self, entry: CatalogEntry) -> bool {
        let mut books = self.books.write().expect("catalog lock poisoned");
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        books.insert(entry.key(), Arc::new(entry));
        true
    }

    /// Remove an entry. Returns `true` if one was removed.
    fn remove(&self, key: &BookKey) -> bool {
        let mut books = self.books.write().expect("catalog lock poisoned");
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        books.remove(key).is_some()
    }

    fn notify(&self) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                tracing::warn!(share = %self.share, "catalog subscriber panicked");
            }
        }
    }
}

enum Command {
    Settle(oneshot::Sender<()>),
}

/// Handle returned by [`BookCatalog::on_catalog_changed`].
#[must_use = "the callback stays registered until `unsubscribe` is called"]
pub struct CatalogSubscription {
    id: u64,
    shared: Weak<Shared>,
}

impl CatalogSubscription {
    /// Deregister the callback.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .subscribers
                .lock()
                .expect("subscriber lock poisoned")
                .remove(&self.id);
        }
    }
}

/// Book index over one share's replica.
pub struct BookCatalog {
    replica: Arc<dyn Replica>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BookCatalog {
    /// Subscribe to `replica` and start indexing. Must be called within a
    /// tokio runtime.
    ///
    /// Both streams are opened before this returns, so every write made
    /// after `open` is observed.
    pub fn open(replica: Arc<dyn Replica>, config: CatalogConfig) -> Self {
        let shared = Arc::new(Shared {
            share: replica.share().clone(),
            books: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let ingest = replica.ingest_events();
        let query = replica.query_stream(QueryFilter {
            path_starts_with: Some(BookPath::PREFIX.to_string()),
            path_ends_with: Some(BookPath::SUFFIX.to_string()),
        });
        let (commands, command_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            replica: replica.clone(),
            shared: shared.clone(),
            config,
        };
        let handle = tokio::spawn(worker.run(ingest, query, command_rx));
        tracing::debug!(share = %shared.share, "book catalog opened");

        Self {
            replica,
            shared,
            commands,
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn share(&self) -> &ShareAddress {
        &self.shared.share
    }

    /// Snapshot of every entry. Later changes do not affect the returned
    /// vector.
    pub fn all_books(&self) -> Vec<CatalogEntry> {
        self.shared
            .books
            .read()
            .expect("catalog lock poisoned")
            .values()
            .map(|entry| CatalogEntry::clone(entry))
            .collect()
    }

    pub fn book(&self, key: &BookKey) -> Option<CatalogEntry> {
        self.shared
            .books
            .read()
            .expect("catalog lock poisoned")
            .get(key)
            .map(|entry| CatalogEntry::clone(entry))
    }

    /// Run `callback` after every insert or removal. Callbacks run on the
    /// worker task and must not block. A panicking callback is logged and
    /// does not stop indexing.
    pub fn on_catalog_changed<F>(&self, callback: F) -> CatalogSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .insert(id, Arc::new(callback));
        CatalogSubscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Archive bytes for a book, if its document and attachment are both
    /// available locally.
    pub async fn book_bytes(&self, uploader: &AuthorAddress, hash: &ContentHash) -> Option<Bytes> {
        let path = BookPath::new(uploader.clone(), hash.clone()).to_string();
        let doc = match self.replica.latest_doc_at_path(&path).await {
            Ok(Some(doc)) if !doc.is_tombstone() => doc,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(%path, error = %e, "book document lookup failed");
                return None;
            }
        };
        match self.replica.attachment(&doc).await {
            Ok(attachment) => attachment.map(|a| a.bytes()),
            Err(e) => {
                tracing::debug!(%path, error = %e, "book attachment lookup failed");
                None
            }
        }
    }

    /// Store an archive as a book uploaded by `author`.
    ///
    /// The input is read once. Each chunk feeds the hasher as it arrives and
    /// lands in one buffer that extraction and the store then share.
    /// Extraction failures and store rejections are returned; the catalog
    /// entry itself appears once the replica reports the write.
    pub async fn add_book<R>(&self, author: &AuthorKeypair, mut input: R) -> CatalogResult<BookKey>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ensure_open()?;

        let mut hasher = ContentHasher::new();
        let mut buf = BytesMut::new();
        loop {
            buf.reserve(READ_CHUNK);
            let start = buf.len();
            let n = input
                .read_buf(&mut buf)
                .await
                .map_err(|source| CatalogError::Read { source })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[start..]);
        }
        let data = buf.freeze();
        let hash = hasher.finish();

        let metadata = extract_blocking(data.clone()).await??;
        let path = BookPath::new(author.address.clone(), hash);

        self.replica
            .set(
                author,
                DocInput {
                    path: path.to_string(),
                    text: metadata.summary(),
                    attachment: Some(data),
                },
            )
            .await?;
        tracing::info!(share = %self.shared.share, %path, title = %metadata.title, "book added");
        Ok(path.key())
    }

    /// Tombstone the document for `hash` uploaded by `author`. No-op if
    /// there is none.
    pub async fn remove_book(&self, author: &AuthorKeypair, hash: &ContentHash) -> CatalogResult<()> {
        self.ensure_open()?;
        let path = BookPath::new(author.address.clone(), hash.clone()).to_string();
        self.replica.wipe_doc_at_path(author, &path).await?;
        tracing::info!(share = %self.shared.share, %path, "book removed");
        Ok(())
    }

    /// Wait until every event delivered so far has been applied.
    pub async fn settled(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Settle(tx)).is_ok() {
            // An error means the worker is gone; nothing is pending then.
            let _ = rx.await;
        }
    }

    /// Stop indexing and close the replica. In-flight work is discarded;
    /// entries already committed stay readable.
    pub async fn close(&self) -> CatalogResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Taking the write lock waits out a commit that is in progress.
        drop(self.shared.books.write().expect("catalog lock poisoned"));
        let worker = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(worker) = worker {
            worker.abort();
        }
        self.replica.close(false).await?;
        tracing::debug!(share = %self.shared.share, "book catalog closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> CatalogResult<()> {
        if self.is_closed() {
            Err(CatalogError::Closed {
                share: self.shared.share.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Drop for BookCatalog {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                worker.abort();
            }
        }
    }
}

async fn extract_blocking(data: Bytes) -> CatalogResult<ExtractResult<BookMetadata>> {
    tokio::task::spawn_blocking(move || parser::extract_bytes(&data))
        .await
        .map_err(|e| CatalogError::Worker {
            message: e.to_string(),
        })
}

/// The single writer of a catalog's map.
struct Worker {
    replica: Arc<dyn Replica>,
    shared: Arc<Shared>,
    config: CatalogConfig,
}

impl Worker {
    async fn run(
        self,
        ingest: futures_util::stream::BoxStream<'static, IngestEvent>,
        query: futures_util::stream::BoxStream<'static, QueryEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut ingest = ingest.fuse();
        let mut query = query.fuse();

        loop {
            tokio::select! {
                biased;
                Some(event) = query.next() => self.on_query(event).await,
                Some(event) = ingest.next() => self.on_ingest(event).await,
                Some(command) = commands.recv() => match command {
                    Command::Settle(done) => {
                        let _ = done.send(());
                    }
                },
                else => break,
            }
        }
        tracing::debug!(share = %self.shared.share, "catalog worker stopped");
    }

    async fn on_query(&self, event: QueryEvent) {
        match event {
            QueryEvent::Existing(doc) | QueryEvent::Success(doc) => self.on_doc(doc).await,
            QueryEvent::ProcessedAllExisting => {
                tracing::debug!(share = %self.shared.share, "book backfill complete");
            }
            QueryEvent::Expire(_) => {}
        }
    }

    async fn on_ingest(&self, event: IngestEvent) {
        match event {
            IngestEvent::AttachmentIngest(doc) => self.on_doc(doc).await,
            IngestEvent::Success(_) => {}
            IngestEvent::Failure { path, reason } => {
                tracing::debug!(share = %self.shared.share, %path, %reason, "write rejected by replica");
            }
        }
    }

    async fn on_doc(&self, event: Doc) {
        let Some(path) = BookPath::parse(&event.path) else {
            return;
        };
        let key = BookKey::new(event.author.clone(), path.hash);

        // The two streams interleave, so an event may describe a document
        // that has since been replaced. Act on the replica's current one.
        let doc = match self.replica.latest_doc_at_path(&event.path).await {
            Ok(Some(latest)) => {
                if latest.timestamp != event.timestamp {
                    tracing::debug!(path = %event.path, "stale book event, using latest document");
                }
                latest
            }
            Ok(None) => event,
            Err(e) => {
                tracing::warn!(path = %event.path, error = %e, "book document lookup failed, skipping");
                return;
            }
        };

        if doc.is_tombstone() {
            if self.shared.remove(&key) {
                tracing::info!(share = %self.shared.share, book = %key, "book removed from catalog");
                self.shared.notify();
            }
            return;
        }

        let fetch = tokio::time::timeout(self.config.fetch_timeout, self.replica.attachment(&doc));
        let data = match fetch.await {
            Ok(Ok(Some(attachment))) => attachment.bytes(),
            Ok(Ok(None)) => {
                tracing::debug!(path = %doc.path, "attachment not available yet, skipping");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %doc.path, error = %e, "attachment fetch failed, skipping");
                return;
            }
            Err(_) => {
                tracing::warn!(
                    path = %doc.path,
                    timeout = ?self.config.fetch_timeout,
                    "attachment fetch timed out, skipping"
                );
                return;
            }
        };

        let metadata = match extract_blocking(data).await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                tracing::warn!(path = %doc.path, error = %e, "metadata extraction failed, skipping");
                return;
            }
            Err(e) => {
                tracing::warn!(path = %doc.path, error = %e, "extraction task failed, skipping");
                return;
            }
        };

        let entry = CatalogEntry {
            uploader: key.uploader.clone(),
            hash: key.hash.clone(),
            metadata,
        };
        if self.shared.insert(entry) {
            tracing::info!(share = %self.shared.share, book = %key, "book indexed");
            self.shared.notify();
        }
    }
}
