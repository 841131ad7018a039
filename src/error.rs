//! Rich diagnostic error types for bookshare.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`BookshareError`] wraps them all so the
//! binary can report any failure with its full diagnostic chain.

use miette::Diagnostic;
use thiserror::Error;

use crate::library::error::{CatalogError, ExtractError};
use crate::paths::PathError;
use crate::settings::SettingsError;

/// Top-level error type for bookshare.
#[derive(Debug, Error, Diagnostic)]
pub enum BookshareError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),
}

pub type BookshareResult<T> = std::result::Result<T, BookshareError>;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors reported by a document store (a [`Replica`](crate::store::Replica)
/// or a [`Peer`](crate::store::Peer)).
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("author {author} may not write to \"{path}\"")]
    #[diagnostic(
        code(bookshare::store::permission_denied),
        help(
            "Paths containing `~address` can only be written by that author. \
             Sign the write with the keypair whose address appears in the path."
        )
    )]
    PermissionDenied { author: String, path: String },

    #[error("replica for share {share} is read-only")]
    #[diagnostic(
        code(bookshare::store::read_only),
        help("Writing to a share requires its secret. Add it to `share_secrets` in settings.")
    )]
    ReadOnly { share: String },

    #[error("invalid document path: \"{path}\"")]
    #[diagnostic(
        code(bookshare::store::invalid_path),
        help("Document paths must start with `/` and must not contain empty segments.")
    )]
    InvalidPath { path: String },

    #[error("replica for share {share} is closed")]
    #[diagnostic(
        code(bookshare::store::closed),
        help("The share was removed or closed. Re-attach it through the peer to use it again.")
    )]
    Closed { share: String },

    #[error("sync with {server} failed: {message}")]
    #[diagnostic(
        code(bookshare::store::sync),
        help("Check the server URL in settings and that the server is reachable.")
    )]
    Sync { server: String, message: String },
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
