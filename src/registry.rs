//! Catalog registry: one [`BookCatalog`] per known share.
//!
//! The [`CatalogRegistry`] owns the [`Peer`] that hands out replicas. It
//! follows the share list published by a [`SettingsSource`]: a share that
//! appears gets a replica and a catalog, a share that disappears has its
//! catalog closed and its replica detached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;

use crate::identity::ShareAddress;
use crate::library::{BookCatalog, CatalogConfig};
use crate::settings::SettingsSource;
use crate::store::Peer;

struct Inner {
    peer: Arc<dyn Peer>,
    settings: Arc<dyn SettingsSource>,
    config: CatalogConfig,
    catalogs: RwLock<HashMap<ShareAddress, Arc<BookCatalog>>>,
    /// Serializes reconciliation so add/remove of one share never overlap.
    reconcile: tokio::sync::Mutex<()>,
}

impl Inner {
    async fn reconcile(&self, wanted: &[ShareAddress]) {
        let _guard = self.reconcile.lock().await;
        let current: Vec<ShareAddress> = self
            .catalogs
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();

        for share in current.iter().filter(|s| !wanted.contains(s)) {
            self.remove(share).await;
        }
        for share in wanted.iter().filter(|s| !current.contains(s)) {
            self.add(share).await;
        }
    }

    async fn add(&self, share: &ShareAddress) {
        let secret = self.settings.share_secret(share);
        match self.peer.attach(share, secret.as_deref()).await {
            Ok(replica) => {
                let catalog = Arc::new(BookCatalog::open(replica, self.config.clone()));
                self.catalogs
                    .write()
                    .expect("registry lock poisoned")
                    .insert(share.clone(), catalog);
                tracing::info!(%share, writable = secret.is_some(), "share added");
            }
            Err(e) => {
                tracing::warn!(%share, error = %e, "failed to attach share");
            }
        }
    }

    async fn remove(&self, share: &ShareAddress) {
        let catalog = self
            .catalogs
            .write()
            .expect("registry lock poisoned")
            .remove(share);
        if let Some(catalog) = catalog {
            if let Err(e) = catalog.close().await {
                tracing::warn!(%share, error = %e, "failed to close catalog");
            }
        }
        self.peer.detach(share);
        tracing::info!(%share, "share removed");
    }
}

/// Keeps one catalog per share in step with settings.
pub struct CatalogRegistry {
    inner: Arc<Inner>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl CatalogRegistry {
    /// Open a catalog for every share in `settings`, start syncing with the
    /// configured servers and follow later share-list changes.
    ///
    /// Sync failures are logged; they do not prevent the registry from
    /// starting.
    pub async fn start(
        peer: Arc<dyn Peer>,
        settings: Arc<dyn SettingsSource>,
        config: CatalogConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            peer,
            settings,
            config,
            catalogs: RwLock::new(HashMap::new()),
            reconcile: tokio::sync::Mutex::new(()),
        });

        let mut shares = inner.settings.watch_shares();
        let initial = shares.borrow_and_update().clone();
        inner.reconcile(&initial).await;

        for server in inner.settings.servers() {
            match inner.peer.sync(&server).await {
                Ok(()) => tracing::info!(%server, "sync started"),
                Err(e) => tracing::warn!(%server, error = %e, "sync failed to start"),
            }
        }

        let watcher = tokio::spawn({
            let inner = inner.clone();
            async move {
                while shares.changed().await.is_ok() {
                    let wanted = shares.borrow_and_update().clone();
                    inner.reconcile(&wanted).await;
                }
                tracing::debug!("share list closed, registry watcher stopped");
            }
        });

        Self {
            inner,
            watcher: Mutex::new(Some(watcher)),
        }
    }

    /// The catalog for `share`, if the share is currently known.
    pub fn catalog(&self, share: &ShareAddress) -> Option<Arc<BookCatalog>> {
        self.inner
            .catalogs
            .read()
            .expect("registry lock poisoned")
            .get(share)
            .cloned()
    }

    /// Shares with an open catalog, sorted.
    pub fn shares(&self) -> Vec<ShareAddress> {
        let mut shares: Vec<_> = self
            .inner
            .catalogs
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        shares.sort();
        shares
    }

    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.inner.peer
    }

    /// Stop following settings and close every catalog.
    pub async fn shutdown(&self) {
        let watcher = self.watcher.lock().expect("watcher lock poisoned").take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        self.inner.reconcile(&[]).await;
    }
}

impl Drop for CatalogRegistry {
    fn drop(&mut self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(watcher) = watcher.take() {
                watcher.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::settings::{BookshareConfig, FileSettings};
    use crate::store::MemoryPeer;

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn settings(shares: &[&str], servers: &[&str]) -> Arc<FileSettings> {
        let mut config = BookshareConfig {
            shares: shares.iter().map(|s| s.to_string()).collect(),
            servers: servers.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        config
            .share_secrets
            .insert("+books.bxyz".into(), "secret".into());
        Arc::new(FileSettings::in_memory(config))
    }

    #[tokio::test]
    async fn opens_known_shares_and_syncs() {
        let peer = Arc::new(MemoryPeer::new());
        let settings = settings(
            &["+books.bxyz", "+comics.babc"],
            &["https://sync.example.org", "gopher://old"],
        );
        let registry =
            CatalogRegistry::start(peer.clone(), settings, CatalogConfig::default()).await;

        assert_eq!(
            registry.shares(),
            vec![ShareAddress::new("+books.bxyz"), ShareAddress::new("+comics.babc")]
        );
        assert!(registry.catalog(&ShareAddress::new("+books.bxyz")).is_some());
        assert!(registry.catalog(&ShareAddress::new("+other.bzzz")).is_none());
        // The bad server is logged and skipped.
        assert_eq!(peer.syncing_with(), vec!["https://sync.example.org".to_string()]);
    }

    #[tokio::test]
    async fn follows_share_list_changes() {
        let peer = Arc::new(MemoryPeer::new());
        let settings = settings(&["+books.bxyz"], &[]);
        let registry =
            CatalogRegistry::start(peer.clone(), settings.clone(), CatalogConfig::default()).await;

        let books = ShareAddress::new("+books.bxyz");
        let comics = ShareAddress::new("+comics.babc");
        let books_catalog = registry.catalog(&books).unwrap();

        settings.add_share(&comics, None).unwrap();
        wait_until(|| registry.catalog(&comics).is_some()).await;
        assert!(peer.replica(&comics).is_some());

        settings.remove_share(&books).unwrap();
        wait_until(|| registry.catalog(&books).is_none()).await;
        assert!(books_catalog.is_closed());
        assert!(peer.replica(&books).is_none());
        assert_eq!(registry.shares(), vec![comics]);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let peer = Arc::new(MemoryPeer::new());
        let settings = settings(&["+books.bxyz"], &[]);
        let registry =
            CatalogRegistry::start(peer.clone(), settings.clone(), CatalogConfig::default()).await;
        let catalog = registry.catalog(&ShareAddress::new("+books.bxyz")).unwrap();

        registry.shutdown().await;
        assert!(catalog.is_closed());
        assert!(registry.shares().is_empty());
        assert!(peer.shares().is_empty());
    }
}
