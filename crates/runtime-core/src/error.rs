//! Error types for checkpoint persistence

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for checkpoint persistence
#[derive(Error, Debug)]
pub enum Error {
    // Persister errors
    #[error("Upload failed for {file:?} (key {key}): {source}")]
    UploadFailed {
        file: PathBuf,
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Final model materialization failed: {source}")]
    MaterializationFailed {
        #[source]
        source: Box<Error>,
    },

    /// The training scope failed and so did the finalize step that ran after it.
    /// `source()` is the scope failure; the finalize failure is carried alongside.
    #[error("Training scope failed: {scope}; finalize also failed: {finalize}")]
    ScopeAndFinalizeFailed {
        #[source]
        scope: Box<Error>,
        finalize: Box<Error>,
    },

    #[error("Invalid destination {uri:?}: {reason}")]
    InvalidDestination { uri: String, reason: String },

    #[error("Persister in invalid state: expected {expected:?}, got {actual}")]
    InvalidPersisterState {
        expected: Vec<String>,
        actual: String,
    },

    // Training collaborator errors
    #[error("Training failed: {message}")]
    Training { message: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage backend not available: {backend}")]
    StorageUnavailable { backend: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    #[error("Invalid object key: {key}")]
    InvalidObjectKey { key: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns the local file an upload failure is attributable to.
    ///
    /// Looks through scope/finalize aggregation so callers can find the
    /// failing file no matter which path surfaced it.
    pub fn failed_file(&self) -> Option<&Path> {
        match self {
            Error::UploadFailed { file, .. } => Some(file),
            Error::ScopeAndFinalizeFailed { finalize, .. } => finalize.failed_file(),
            _ => None,
        }
    }

    /// Returns true if this error came out of the object store
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Storage { .. }
                | Error::StorageUnavailable { .. }
                | Error::StoragePathNotFound { .. }
                | Error::UploadFailed { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
