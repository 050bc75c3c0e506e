// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchpackError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid watch path {path:?}: {reason}")]
    InvalidWatchPath { path: PathBuf, reason: String },

    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),

    #[error("Watcher manager is no longer running")]
    ManagerClosed,

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WatchpackError {
    pub(crate) fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        WatchpackError::InvalidWatchPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WatchpackError>;

/// Not-found and permission errors are expected while paths come and go.
///
/// They are folded into the missing / self-healing paths and never logged.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}
