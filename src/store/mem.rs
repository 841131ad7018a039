//! In-memory replica and peer.
//!
//! [`MemoryReplica`] keeps the latest document per path plus attachment
//! bytes keyed by content hash. It enforces the two write rules the catalog
//! relies on: a replica opened without the share secret is read-only, and a
//! path containing `~address` may only be written by that author. All data is
//! lost on drop.
//!
//! [`MemoryPeer`] hands out one replica per share and records which servers
//! it was asked to sync with; it does no networking.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{StoreError, StoreResult};
use crate::hash::hash_bytes;
use crate::identity::{AuthorAddress, AuthorKeypair, ShareAddress};
use crate::store::{
    Attachment, Doc, DocInput, IngestEvent, Peer, QueryEvent, QueryFilter, Replica,
};

#[derive(Default)]
struct ReplicaState {
    docs: BTreeMap<String, Doc>,
    attachments: HashMap<String, Bytes>,
    ingest_subs: Vec<mpsc::UnboundedSender<IngestEvent>>,
    query_subs: Vec<(QueryFilter, mpsc::UnboundedSender<QueryEvent>)>,
    clock: u64,
    closed: bool,
}

impl ReplicaState {
    fn next_timestamp(&mut self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    /// Store `doc`, then fan the resulting events out to subscribers.
    fn commit(&mut self, doc: Doc, attachment: Option<Bytes>) {
        let ingested_attachment = match (attachment, &doc.attachment_hash) {
            (Some(data), Some(hash)) if !data.is_empty() => {
                self.attachments.insert(hash.clone(), data);
                true
            }
            _ => false,
        };

        if let Some(previous) = self.docs.insert(doc.path.clone(), doc.clone()) {
            self.drop_unreferenced(previous.attachment_hash.as_deref());
        }

        self.emit_ingest(IngestEvent::Success(doc.clone()));
        if ingested_attachment {
            self.emit_ingest(IngestEvent::AttachmentIngest(doc.clone()));
        }
        self.emit_query(&doc);
    }

    fn drop_unreferenced(&mut self, hash: Option<&str>) {
        let Some(hash) = hash else { return };
        let referenced = self
            .docs
            .values()
            .any(|d| d.attachment_hash.as_deref() == Some(hash));
        if !referenced {
            self.attachments.remove(hash);
        }
    }

    fn emit_ingest(&mut self, event: IngestEvent) {
        self.ingest_subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_query(&mut self, doc: &Doc) {
        self.query_subs.retain(|(filter, tx)| {
            !filter.matches(&doc.path) || tx.send(QueryEvent::Success(doc.clone())).is_ok()
        });
    }
}

/// A single share held entirely in memory.
pub struct MemoryReplica {
    share: ShareAddress,
    writable: bool,
    state: Mutex<ReplicaState>,
}

impl MemoryReplica {
    /// A writable replica (the share secret is known).
    pub fn new(share: ShareAddress) -> Self {
        Self {
            share,
            writable: true,
            state: Mutex::new(ReplicaState::default()),
        }
    }

    /// A replica that can receive synced documents but not author them.
    pub fn read_only(share: ShareAddress) -> Self {
        Self {
            writable: false,
            ..Self::new(share)
        }
    }

    /// Accept a document that was authored elsewhere, as a sync transport
    /// would. Signing and path ownership are the remote author's business.
    pub fn ingest_doc(&self, doc: Doc, attachment: Option<Bytes>) -> StoreResult<()> {
        let mut state = self.lock();
        self.ensure_open(&state)?;
        state.commit(doc, attachment);
        Ok(())
    }

    /// Accept the attachment for an already-ingested document.
    pub fn ingest_attachment(&self, doc: &Doc, data: Bytes) -> StoreResult<()> {
        let mut state = self.lock();
        self.ensure_open(&state)?;
        let hash = doc
            .attachment_hash
            .clone()
            .unwrap_or_else(|| hash_bytes(&data).to_string());
        state.attachments.insert(hash, data);
        state.emit_ingest(IngestEvent::AttachmentIngest(doc.clone()));
        Ok(())
    }

    /// Number of paths holding a document (tombstones included).
    pub fn len(&self) -> usize {
        self.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplicaState> {
        self.state.lock().expect("replica lock poisoned")
    }

    fn ensure_open(&self, state: &ReplicaState) -> StoreResult<()> {
        if state.closed {
            Err(StoreError::Closed {
                share: self.share.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self, author: &AuthorKeypair, path: &str) -> StoreResult<()> {
        if !self.writable {
            return Err(StoreError::ReadOnly {
                share: self.share.to_string(),
            });
        }
        if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
            return Err(StoreError::InvalidPath { path: path.into() });
        }
        if path.contains('~') && !path.contains(&format!("~{}", author.address)) {
            return Err(StoreError::PermissionDenied {
                author: author.address.to_string(),
                path: path.into(),
            });
        }
        Ok(())
    }

    fn new_doc(&self, state: &mut ReplicaState, author: &AuthorAddress, path: &str) -> Doc {
        Doc {
            share: self.share.clone(),
            path: path.into(),
            author: author.clone(),
            text: String::new(),
            attachment_size: None,
            attachment_hash: None,
            timestamp: state.next_timestamp(),
        }
    }
}

fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> impl Stream<Item = T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

#[async_trait]
impl Replica for MemoryReplica {
    fn share(&self) -> &ShareAddress {
        &self.share
    }

    async fn set(&self, author: &AuthorKeypair, input: DocInput) -> StoreResult<Doc> {
        let mut state = self.lock();
        self.ensure_open(&state)?;
        if let Err(e) = self.ensure_writable(author, &input.path) {
            state.emit_ingest(IngestEvent::Failure {
                path: input.path.clone(),
                reason: e.to_string(),
            });
            return Err(e);
        }

        let mut doc = self.new_doc(&mut state, &author.address, &input.path);
        doc.text = input.text;
        if let Some(data) = &input.attachment {
            doc.attachment_size = Some(data.len() as u64);
            doc.attachment_hash = Some(hash_bytes(data).to_string());
        }

        tracing::debug!(share = %self.share, path = %doc.path, "document written");
        state.commit(doc.clone(), input.attachment);
        Ok(doc)
    }

    async fn latest_doc_at_path(&self, path: &str) -> StoreResult<Option<Doc>> {
        let state = self.lock();
        self.ensure_open(&state)?;
        Ok(state.docs.get(path).cloned())
    }

    async fn attachment(&self, doc: &Doc) -> StoreResult<Option<Attachment>> {
        let state = self.lock();
        self.ensure_open(&state)?;
        if doc.attachment_size.is_none() {
            return Ok(None);
        }
        Ok(doc
            .attachment_hash
            .as_ref()
            .and_then(|hash| state.attachments.get(hash))
            .map(|data| Attachment::new(data.clone())))
    }

    async fn wipe_doc_at_path(&self, author: &AuthorKeypair, path: &str) -> StoreResult<()> {
        let mut state = self.lock();
        self.ensure_open(&state)?;
        if !state.docs.contains_key(path) {
            return Ok(());
        }
        self.ensure_writable(author, path)?;

        let mut tombstone = self.new_doc(&mut state, &author.address, path);
        tombstone.attachment_size = Some(0);
        tombstone.attachment_hash = Some(hash_bytes(&[]).to_string());

        tracing::debug!(share = %self.share, path, "document wiped");
        state.commit(tombstone, None);
        Ok(())
    }

    fn ingest_events(&self) -> BoxStream<'static, IngestEvent> {
        let mut state = self.lock();
        if state.closed {
            return stream::empty().boxed();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.ingest_subs.push(tx);
        receiver_stream(rx).boxed()
    }

    fn query_stream(&self, filter: QueryFilter) -> BoxStream<'static, QueryEvent> {
        let mut state = self.lock();
        if state.closed {
            return stream::empty().boxed();
        }
        // Snapshot and subscribe under one lock so no write falls in between.
        let existing: Vec<QueryEvent> = state
            .docs
            .values()
            .filter(|doc| filter.matches(&doc.path))
            .cloned()
            .map(QueryEvent::Existing)
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        state.query_subs.push((filter, tx));

        stream::iter(existing)
            .chain(stream::once(async { QueryEvent::ProcessedAllExisting }))
            .chain(receiver_stream(rx))
            .boxed()
    }

    async fn close(&self, erase: bool) -> StoreResult<()> {
        let mut state = self.lock();
        state.closed = true;
        state.ingest_subs.clear();
        state.query_subs.clear();
        if erase {
            state.docs.clear();
            state.attachments.clear();
        }
        tracing::debug!(share = %self.share, erase, "replica closed");
        Ok(())
    }
}

/// Peer over in-memory replicas.
#[derive(Default)]
pub struct MemoryPeer {
    replicas: Mutex<HashMap<ShareAddress, Arc<MemoryReplica>>>,
    servers: Mutex<Vec<String>>,
}

impl MemoryPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The concrete replica attached for `share`, if any.
    pub fn replica(&self, share: &ShareAddress) -> Option<Arc<MemoryReplica>> {
        self.replicas
            .lock()
            .expect("peer lock poisoned")
            .get(share)
            .cloned()
    }

    /// Shares with an attached replica.
    pub fn shares(&self) -> Vec<ShareAddress> {
        let mut shares: Vec<_> = self
            .replicas
            .lock()
            .expect("peer lock poisoned")
            .keys()
            .cloned()
            .collect();
        shares.sort();
        shares
    }

    /// Servers `sync` has been started with.
    pub fn syncing_with(&self) -> Vec<String> {
        self.servers.lock().expect("peer lock poisoned").clone()
    }
}

#[async_trait]
impl Peer for MemoryPeer {
    async fn attach(
        &self,
        share: &ShareAddress,
        secret: Option<&str>,
    ) -> StoreResult<Arc<dyn Replica>> {
        let mut replicas = self.replicas.lock().expect("peer lock poisoned");
        if let Some(existing) = replicas.get(share) {
            if !existing.is_closed() {
                let replica: Arc<dyn Replica> = existing.clone();
                return Ok(replica);
            }
        }
        let replica = Arc::new(match secret {
            Some(_) => MemoryReplica::new(share.clone()),
            None => MemoryReplica::read_only(share.clone()),
        });
        replicas.insert(share.clone(), replica.clone());
        tracing::debug!(%share, writable = secret.is_some(), "replica attached");
        let replica: Arc<dyn Replica> = replica;
        Ok(replica)
    }

    fn detach(&self, share: &ShareAddress) {
        if self
            .replicas
            .lock()
            .expect("peer lock poisoned")
            .remove(share)
            .is_some()
        {
            tracing::debug!(%share, "replica detached");
        }
    }

    async fn sync(&self, server: &str) -> StoreResult<()> {
        let supported = ["http://", "https://", "ws://", "wss://"];
        if !supported.iter().any(|scheme| server.starts_with(scheme)) {
            return Err(StoreError::Sync {
                server: server.into(),
                message: "unsupported URL scheme".into(),
            });
        }
        let mut servers = self.servers.lock().expect("peer lock poisoned");
        if !servers.iter().any(|s| s == server) {
            servers.push(server.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suzy() -> AuthorKeypair {
        AuthorKeypair::new("@suzy.bxyz", "secret")
    }

    fn replica() -> MemoryReplica {
        MemoryReplica::new(ShareAddress::new("+books.bxyz"))
    }

    fn input(path: &str, text: &str, attachment: Option<&'static [u8]>) -> DocInput {
        DocInput {
            path: path.into(),
            text: text.into(),
            attachment: attachment.map(Bytes::from_static),
        }
    }

    #[tokio::test]
    async fn set_and_fetch_attachment() {
        let replica = replica();
        let doc = replica
            .set(&suzy(), input("/books/~@suzy.bxyz/h/doc.epub", "Epub", Some(b"zip")))
            .await
            .unwrap();
        assert_eq!(doc.attachment_size, Some(3));

        let latest = replica
            .latest_doc_at_path("/books/~@suzy.bxyz/h/doc.epub")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest, doc);

        let attachment = replica.attachment(&latest).await.unwrap().unwrap();
        assert_eq!(&attachment.bytes()[..], b"zip");
    }

    #[tokio::test]
    async fn foreign_owned_path_is_rejected() {
        let replica = replica();
        let err = replica
            .set(&suzy(), input("/books/~@other.babc/h/doc.epub", "x", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));
        assert!(replica.is_empty());
    }

    #[tokio::test]
    async fn read_only_replica_rejects_writes() {
        let replica = MemoryReplica::read_only(ShareAddress::new("+books.bxyz"));
        let err = replica
            .set(&suzy(), input("/books/~@suzy.bxyz/h/doc.epub", "x", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly { .. }));
    }

    #[tokio::test]
    async fn invalid_paths_are_rejected() {
        let replica = replica();
        for path in ["books/x", "/books//x", "/books/"] {
            let err = replica.set(&suzy(), input(path, "x", None)).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidPath { .. }), "{path}");
        }
    }

    #[tokio::test]
    async fn wipe_writes_tombstone_and_drops_attachment() {
        let replica = replica();
        let path = "/books/~@suzy.bxyz/h/doc.epub";
        let doc = replica
            .set(&suzy(), input(path, "Epub", Some(b"zip")))
            .await
            .unwrap();
        replica.wipe_doc_at_path(&suzy(), path).await.unwrap();

        let wiped = replica.latest_doc_at_path(path).await.unwrap().unwrap();
        assert!(wiped.is_tombstone());
        assert!(replica.attachment(&doc).await.unwrap().is_none());

        // Wiping an empty path is a no-op.
        replica
            .wipe_doc_at_path(&suzy(), "/books/~@suzy.bxyz/none/doc.epub")
            .await
            .unwrap();
        assert_eq!(replica.len(), 1);
    }

    #[tokio::test]
    async fn query_stream_backfills_then_tails() {
        let replica = replica();
        replica
            .set(&suzy(), input("/books/~@suzy.bxyz/a/doc.epub", "a", None))
            .await
            .unwrap();
        replica
            .set(&suzy(), input("/notes/~@suzy.bxyz/n.txt", "n", None))
            .await
            .unwrap();

        let mut events = replica.query_stream(QueryFilter {
            path_starts_with: Some("/books/~".into()),
            path_ends_with: Some("/doc.epub".into()),
        });

        replica
            .set(&suzy(), input("/books/~@suzy.bxyz/b/doc.epub", "b", None))
            .await
            .unwrap();

        match events.next().await.unwrap() {
            QueryEvent::Existing(doc) => assert_eq!(doc.text, "a"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            events.next().await.unwrap(),
            QueryEvent::ProcessedAllExisting
        ));
        match events.next().await.unwrap() {
            QueryEvent::Success(doc) => assert_eq!(doc.text, "b"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn ingest_stream_reports_attachments() {
        let replica = replica();
        let mut events = replica.ingest_events();
        replica
            .set(&suzy(), input("/books/~@suzy.bxyz/a/doc.epub", "a", Some(b"zip")))
            .await
            .unwrap();

        assert!(matches!(events.next().await.unwrap(), IngestEvent::Success(_)));
        assert!(matches!(
            events.next().await.unwrap(),
            IngestEvent::AttachmentIngest(_)
        ));
    }

    #[tokio::test]
    async fn close_ends_streams_and_rejects_operations() {
        let replica = replica();
        let mut events = replica.ingest_events();
        replica.close(false).await.unwrap();
        assert!(events.next().await.is_none());
        assert!(matches!(
            replica.latest_doc_at_path("/x").await,
            Err(StoreError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn peer_reuses_replicas_and_validates_servers() {
        let peer = MemoryPeer::new();
        let share = ShareAddress::new("+books.bxyz");
        let a = peer.attach(&share, Some("secret")).await.unwrap();
        let b = peer.attach(&share, Some("secret")).await.unwrap();
        assert!(std::ptr::addr_eq(Arc::as_ptr(&a), Arc::as_ptr(&b)));
        assert_eq!(peer.shares(), vec![share.clone()]);

        peer.sync("https://sync.example.org").await.unwrap();
        peer.sync("https://sync.example.org").await.unwrap();
        assert_eq!(peer.syncing_with().len(), 1);
        assert!(matches!(
            peer.sync("ftp://nope").await,
            Err(StoreError::Sync { .. })
        ));

        peer.detach(&share);
        assert!(peer.replica(&share).is_none());
    }
}
