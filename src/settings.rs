//! Local settings: known shares, their secrets, sync servers and the current
//! author.
//!
//! Settings are persisted as TOML at `$XDG_CONFIG_HOME/bookshare/settings.toml`.
//! The registry never reads them as ambient state; it is handed a
//! [`SettingsSource`] and watches the share list through a `tokio::sync::watch`
//! channel.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::identity::{AuthorKeypair, ShareAddress};
use crate::library::catalog::CatalogConfig;

/// Errors from loading or saving settings.
#[derive(Debug, Error, Diagnostic)]
pub enum SettingsError {
    #[error("failed to read settings: {path}")]
    #[diagnostic(
        code(bookshare::settings::read),
        help("Ensure the settings file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {path}: {message}")]
    #[diagnostic(
        code(bookshare::settings::parse),
        help("Check the TOML syntax in the settings file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write settings: {path}")]
    #[diagnostic(
        code(bookshare::settings::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// The author identity stored in settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorConfig {
    pub address: String,
    pub secret: String,
}

impl std::fmt::Debug for AuthorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorConfig")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Persisted settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookshareConfig {
    /// Share addresses this device knows about.
    #[serde(default)]
    pub shares: Vec<String>,
    /// Write secrets keyed by share address.
    #[serde(default)]
    pub share_secrets: BTreeMap<String, String>,
    /// Servers to sync with.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Upper bound on a single attachment fetch while indexing.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Identity used to sign writes.
    #[serde(default)]
    pub author: Option<AuthorConfig>,
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for BookshareConfig {
    fn default() -> Self {
        Self {
            shares: Vec::new(),
            share_secrets: BTreeMap::new(),
            servers: Vec::new(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            author: None,
        }
    }
}

impl BookshareConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| SettingsError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| SettingsError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| SettingsError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Catalog tuning derived from these settings.
    pub fn to_catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn author_keypair(&self) -> Option<AuthorKeypair> {
        self.author
            .as_ref()
            .map(|a| AuthorKeypair::new(a.address.clone(), a.secret.clone()))
    }

    fn share_addresses(&self) -> Vec<ShareAddress> {
        self.shares.iter().map(|s| ShareAddress::new(s.as_str())).collect()
    }
}

/// Read access to settings plus change notification for the share list.
///
/// Dropping the receiver returned by [`watch_shares`](Self::watch_shares)
/// unsubscribes.
pub trait SettingsSource: Send + Sync {
    fn shares(&self) -> Vec<ShareAddress>;

    fn share_secret(&self, share: &ShareAddress) -> Option<String>;

    fn servers(&self) -> Vec<String>;

    fn watch_shares(&self) -> watch::Receiver<Vec<ShareAddress>>;
}

/// Settings backed by a [`BookshareConfig`], optionally persisted to a file.
pub struct FileSettings {
    path: Option<PathBuf>,
    config: RwLock<BookshareConfig>,
    shares_tx: watch::Sender<Vec<ShareAddress>>,
}

impl FileSettings {
    /// Open settings at `path`; a missing file yields defaults.
    pub fn open(path: impl Into<PathBuf>) -> SettingsResult<Self> {
        let path = path.into();
        let config = BookshareConfig::load_or_default(&path)?;
        Ok(Self::build(Some(path), config))
    }

    /// Settings that live only in memory.
    pub fn in_memory(config: BookshareConfig) -> Self {
        Self::build(None, config)
    }

    fn build(path: Option<PathBuf>, config: BookshareConfig) -> Self {
        let (shares_tx, _) = watch::channel(config.share_addresses());
        Self {
            path,
            config: RwLock::new(config),
            shares_tx,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> BookshareConfig {
        self.config.read().expect("settings lock poisoned").clone()
    }

    /// Add a share (and optionally its secret). No-op if already known.
    pub fn add_share(&self, share: &ShareAddress, secret: Option<String>) -> SettingsResult<()> {
        self.update(|config| {
            if !config.shares.iter().any(|s| s == share.as_str()) {
                config.shares.push(share.to_string());
            }
            if let Some(secret) = secret {
                config.share_secrets.insert(share.to_string(), secret);
            }
        })
    }

    /// Forget a share and its secret.
    pub fn remove_share(&self, share: &ShareAddress) -> SettingsResult<()> {
        self.update(|config| {
            config.shares.retain(|s| s != share.as_str());
            config.share_secrets.remove(share.as_str());
        })
    }

    /// Replace the share list wholesale.
    pub fn set_shares(&self, shares: Vec<ShareAddress>) -> SettingsResult<()> {
        self.update(|config| {
            config.shares = shares.iter().map(ToString::to_string).collect();
        })
    }

    fn update(&self, apply: impl FnOnce(&mut BookshareConfig)) -> SettingsResult<()> {
        let shares = {
            let mut config = self.config.write().expect("settings lock poisoned");
            apply(&mut config);
            if let Some(path) = &self.path {
                config.save(path)?;
            }
            config.share_addresses()
        };
        self.shares_tx.send_if_modified(|current| {
            if *current == shares {
                false
            } else {
                *current = shares;
                true
            }
        });
        Ok(())
    }
}

impl SettingsSource for FileSettings {
    fn shares(&self) -> Vec<ShareAddress> {
        self.config
            .read()
            .expect("settings lock poisoned")
            .share_addresses()
    }

    fn share_secret(&self, share: &ShareAddress) -> Option<String> {
        self.config
            .read()
            .expect("settings lock poisoned")
            .share_secrets
            .get(share.as_str())
            .cloned()
    }

    fn servers(&self) -> Vec<String> {
        self.config
            .read()
            .expect("settings lock poisoned")
            .servers
            .clone()
    }

    fn watch_shares(&self) -> watch::Receiver<Vec<ShareAddress>> {
        self.shares_tx.subscribe()
    }
}
