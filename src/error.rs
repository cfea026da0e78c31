//! Error taxonomy for the merge pipeline and the record store.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`StoreError`], used by callers that only care
/// about which stage failed (e.g. the HTTP layer mapping to status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Validation,
    NotFound,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o failure on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse '{file}': {reason}")]
    Parse { file: String, reason: String },

    #[error("invalid record at {file}:{line}: field '{field}' {reason}")]
    Validation {
        file: String,
        line: u64,
        field: String,
        reason: String,
    },

    #[error("no persisted result at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io { .. } => ErrorKind::Io,
            StoreError::Parse { .. } | StoreError::Encode(_) => ErrorKind::Parse,
            StoreError::Validation { .. } => ErrorKind::Validation,
            StoreError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}
