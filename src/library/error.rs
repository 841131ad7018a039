//! Rich diagnostic error types for archive extraction and the book catalog.

use miette::Diagnostic;
use thiserror::Error;

use crate::error::StoreError;

/// Errors from reading metadata out of an epub archive.
///
/// Cover resolution never produces one of these; a missing or broken cover
/// is an ordinary "no cover" outcome.
#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("not a readable zip archive: {message}")]
    #[diagnostic(
        code(bookshare::extract::archive),
        help("Epub files are zip containers. Verify the file is an epub and not truncated.")
    )]
    Archive { message: String },

    #[error("archive has no META-INF/container.xml")]
    #[diagnostic(
        code(bookshare::extract::container_not_found),
        help("Every epub must carry META-INF/container.xml pointing at its package document.")
    )]
    ContainerNotFound,

    #[error("META-INF/container.xml does not name a package document")]
    #[diagnostic(
        code(bookshare::extract::malformed_container),
        help("The first <rootfile> element needs a non-empty `full-path` attribute.")
    )]
    MalformedContainer,

    #[error("package document \"{path}\" is not in the archive")]
    #[diagnostic(
        code(bookshare::extract::manifest_not_found),
        help("container.xml points at a file the archive does not contain.")
    )]
    ManifestNotFound { path: String },

    #[error("package document has no <metadata> block")]
    #[diagnostic(
        code(bookshare::extract::metadata_missing),
        help("The package document must contain <package><metadata>...</metadata></package>.")
    )]
    MetadataBlockMissing,

    #[error("missing required metadata: {field}")]
    #[diagnostic(
        code(bookshare::extract::missing_field),
        help(
            "Title, language and at least one identifier are required. \
             They are read from dc:title, dc:language and dc:identifier."
        )
    )]
    MissingRequiredField { field: &'static str },

    #[error("malformed XML in \"{entry}\": {message}")]
    #[diagnostic(
        code(bookshare::extract::xml),
        help("The archive entry is not well-formed XML.")
    )]
    Xml { entry: String, message: String },

    #[error("failed to read archive entry \"{entry}\": {source}")]
    #[diagnostic(
        code(bookshare::extract::io),
        help("The entry could not be decompressed. The archive may be corrupted.")
    )]
    Io {
        entry: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for extraction results.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

/// Errors surfaced by [`BookCatalog`](crate::library::BookCatalog) write
/// operations. Event handling never returns these; it logs and skips.
#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("failed to read book input: {source}")]
    #[diagnostic(
        code(bookshare::catalog::read),
        help("The archive stream ended with an error before it was fully read.")
    )]
    Read {
        #[source]
        source: std::io::Error,
    },

    #[error("background extraction did not finish: {message}")]
    #[diagnostic(
        code(bookshare::catalog::worker),
        help("The blocking task running the extractor panicked or was cancelled.")
    )]
    Worker { message: String },

    #[error("catalog for share {share} is closed")]
    #[diagnostic(
        code(bookshare::catalog::closed),
        help("The share was removed. Look the catalog up again through the registry.")
    )]
    Closed { share: String },
}

/// Convenience alias for catalog results.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
