//! Local Store Adapter: profile-scoped persistence of the record collection
//! and the dirty-id set, written to a primary store and mirrored to an
//! optional fallback store.
//!
//! Reads prefer the primary and fall back when it is empty, unreadable or
//! corrupt. Writes go to every store independently; a write only fails when
//! no store accepted it. A store that rejects a write has its copy of the
//! key removed, so an older payload never shadows the newer one.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::StorageError;
use crate::types::{ProfileScope, Record, RecordId};

use super::traits::LocalStore;

pub struct ScopedStore {
    primary: Arc<dyn LocalStore>,
    fallback: Option<Arc<dyn LocalStore>>,
    collection: String,
}

impl ScopedStore {
    pub fn new(primary: Arc<dyn LocalStore>, collection: impl Into<String>) -> Self {
        Self {
            primary,
            fallback: None,
            collection: collection.into(),
        }
    }

    /// Mirror every write to `fallback` as well.
    pub fn with_fallback(mut self, fallback: Arc<dyn LocalStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Load the committed collection for `profile`. Empty when nothing has
    /// been stored yet.
    pub fn load_records(&self, profile: &ProfileScope) -> Result<Vec<Record>, StorageError> {
        let key = profile.records_key(&self.collection);
        let mut last_err = None;

        for store in self.stores() {
            match store.get(&key) {
                Ok(Some(value)) => match decode_records(&key, value) {
                    Ok(records) => return Ok(records),
                    Err(e) => {
                        tracing::warn!(
                            key = %key,
                            error = %e,
                            "discarding unreadable snapshot copy"
                        );
                        last_err = Some(e);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "snapshot read failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    pub fn save_records(
        &self,
        profile: &ProfileScope,
        records: &[Record],
    ) -> Result<(), StorageError> {
        let key = profile.records_key(&self.collection);
        let value = serde_json::to_value(records).map_err(|e| StorageError::Write {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.write_all(&key, &value)
    }

    // -----------------------------------------------------------------------
    // Dirty ids
    // -----------------------------------------------------------------------

    /// Load the dirty-id set for `profile`: the union of every readable copy,
    /// so a marker survives as long as any store kept it.
    pub fn load_dirty(&self, profile: &ProfileScope) -> BTreeSet<RecordId> {
        let key = profile.dirty_key(&self.collection);
        let mut ids = BTreeSet::new();

        for store in self.stores() {
            match store.get(&key) {
                Ok(Some(value)) => match serde_json::from_value::<Vec<RecordId>>(value) {
                    Ok(stored) => ids.extend(stored),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "ignoring unreadable dirty-id copy");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "dirty-id read failed");
                }
            }
        }

        ids
    }

    pub fn save_dirty(
        &self,
        profile: &ProfileScope,
        ids: &BTreeSet<RecordId>,
    ) -> Result<(), StorageError> {
        let key = profile.dirty_key(&self.collection);
        let value = Value::Array(ids.iter().cloned().map(Value::String).collect());
        self.write_all(&key, &value)
    }

    /// Remove everything stored for `profile` (sign-out).
    pub fn clear(&self, profile: &ProfileScope) -> Result<(), StorageError> {
        let keys = [
            profile.records_key(&self.collection),
            profile.dirty_key(&self.collection),
        ];
        for store in self.stores() {
            for key in &keys {
                store.remove(key)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn stores(&self) -> impl Iterator<Item = &Arc<dyn LocalStore>> {
        std::iter::once(&self.primary).chain(self.fallback.iter())
    }

    fn write_all(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let mut written = 0;
        let mut rejected = Vec::new();
        let mut first_err = None;

        for (index, store) in self.stores().enumerate() {
            match store.set(key, value) {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        store = index,
                        error = %e,
                        "local store write failed"
                    );
                    rejected.push((index, store));
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) if written == 0 => Err(e),
            _ => {
                // Drop outdated copies so reads reach the store that has the
                // new payload.
                for (index, store) in rejected {
                    if let Err(e) = store.remove(key) {
                        tracing::warn!(
                            key = %key,
                            store = index,
                            error = %e,
                            "outdated copy could not be removed"
                        );
                    }
                }
                Ok(())
            }
        }
    }
}

fn decode_records(key: &str, value: Value) -> Result<Vec<Record>, StorageError> {
    serde_json::from_value(value).map_err(|source| StorageError::Corruption {
        key: key.to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
