//! XDG-compliant path resolution for bookshare.
//!
//! Settings live under `$XDG_CONFIG_HOME/bookshare/`, per-share data under
//! `$XDG_DATA_HOME/bookshare/shares/`.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::identity::ShareAddress;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(bookshare::paths::no_home),
        help("Set the HOME environment variable or ensure a valid user profile exists.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(bookshare::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG-compliant directories for bookshare.
#[derive(Debug, Clone)]
pub struct BooksharePaths {
    /// `$XDG_CONFIG_HOME/bookshare/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/bookshare/`
    pub data_dir: PathBuf,
}

impl BooksharePaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("bookshare");

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join("bookshare");

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Create all base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.data_dir.join("shares")] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Path to the settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.toml")
    }

    /// Data directory for a share's replica driver.
    ///
    /// The `+` sigil and the `.` separator are kept; anything that is not
    /// filename-safe is replaced with `_`.
    pub fn share_dir(&self, share: &ShareAddress) -> PathBuf {
        let safe: String = share
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.data_dir.join("shares").join(safe)
    }
}
