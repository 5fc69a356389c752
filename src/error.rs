use std::path::PathBuf;

use thiserror::Error;

use crate::models::CatalogId;

/// Every failure the catalog engine can surface.
///
/// `Io` is per-file and normally downgraded to a skip by the walker and the
/// comparator; it only reaches a job outcome when the root itself is unusable.
/// `Store` always fails the whole job after the transaction is rolled back.
/// `Cancelled` is a terminal outcome of its own, not a failure.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("catalog {0} not found")]
    NotFound(CatalogId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("background job stopped unexpectedly: {0}")]
    Worker(String),

    #[error("catalog digests were built with {stored}, current algorithm is {current}")]
    DigestAlgorithmMismatch { stored: String, current: String },
}

impl CatalogError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CatalogError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CatalogError::Cancelled)
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
