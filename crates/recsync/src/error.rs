use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Failure of the local key/value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read \"{key}\": {message}")]
    Read { key: String, message: String },

    #[error("Failed to write \"{key}\": {message}")]
    Write { key: String, message: String },

    #[error("Storage corruption under \"{key}\": payload is not valid JSON")]
    Corruption {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Transport or connectivity failure (retry later).
    Network,
    /// The backend answered, but refused the request (schema mismatch, auth, ...).
    Rejection,
}

/// Error value returned by remote backend collaborators.
///
/// Remote calls never panic across the engine boundary; every failure is one
/// of these.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub message: String,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: RemoteErrorKind::Network,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: RemoteErrorKind::Rejection,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteError {}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote rejected [{}]: {message}", .ids.join(", "))]
    RemoteRejection { ids: Vec<String>, message: String },

    #[error("Sync is not configured: {0}")]
    MissingConfiguration(String),

    #[error(transparent)]
    Persistence(#[from] StorageError),

    #[error("Cannot decode remote record: {0}")]
    Decode(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("Sync engine disposed")]
    Disposed,
}

/// Result alias defaulting to `EngineError`.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
