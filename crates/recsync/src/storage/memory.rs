//! In-process `LocalStore`.
//!
//! Payloads are kept serialized so reads hand back an independent copy, the
//! same way a durable store would.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StorageError;

use super::traits::LocalStore;

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw serialized payload under `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Overwrite the raw payload under `key` without validation.
    pub fn set_raw(&self, key: &str, raw: impl Into<String>) {
        self.entries.lock().insert(key.to_string(), raw.into());
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let raw = match self.entries.lock().get(key) {
            Some(raw) => raw.clone(),
            None => return Ok(None),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corruption {
                key: key.to_string(),
                source,
            })
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
