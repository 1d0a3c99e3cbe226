//! Local store collaborator.
//!
//! `LocalStore` is the narrow key/value I/O trait implemented by concrete
//! backends (in-memory, SQLite, or a host-provided store). Payloads are JSON
//! values; keys are derived from the profile scope by `ProfileScope`.

use serde_json::Value;

use crate::error::StorageError;

/// Raw key/value persistence. Implementors must be `Send + Sync` so a store
/// can be shared between the dirty-set tracker and the snapshot adapter.
pub trait LocalStore: Send + Sync {
    /// Read the payload stored under `key`, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Insert or replace the payload under `key`.
    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
