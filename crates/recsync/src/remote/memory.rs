//! In-process `RemoteBackend`.
//!
//! Several engines sharing one `MemoryRemote` behave like devices sharing a
//! hosted table: upserts replace by id in place, fetches filter by owning
//! profile, and every effective change is broadcast to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::RemoteError;
use crate::mapper::WireRecord;
use crate::types::ProfileScope;

use super::types::{AuditEntry, RemoteBackend, RemoteChange};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

pub struct MemoryRemote {
    tables: Mutex<HashMap<String, Vec<WireRecord>>>,
    audit: Mutex<Vec<AuditEntry>>,
    changes: broadcast::Sender<RemoteChange>,
    offline: AtomicBool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tables: Mutex::new(HashMap::new()),
            audit: Mutex::new(Vec::new()),
            changes,
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every stored row of `collection`, regardless of owner.
    pub fn rows(&self, collection: &str) -> Vec<WireRecord> {
        self.tables
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<WireRecord> {
        self.tables
            .lock()
            .get(collection)
            .and_then(|rows| rows.iter().find(|r| r.id == id).cloned())
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().clone()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::network("remote unreachable"))
        } else {
            Ok(())
        }
    }

    fn notify(&self, collection: &str, id: &str) {
        // No subscribers is fine.
        let _ = self.changes.send(RemoteChange {
            collection: collection.to_string(),
            id: Some(id.to_string()),
        });
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn upsert(&self, collection: &str, record: &WireRecord) -> Result<(), RemoteError> {
        self.check_online()?;
        let changed = {
            let mut tables = self.tables.lock();
            let rows = tables.entry(collection.to_string()).or_default();
            match rows.iter_mut().find(|r| r.id == record.id) {
                Some(existing) if *existing == *record => false,
                Some(existing) => {
                    *existing = record.clone();
                    true
                }
                None => {
                    rows.push(record.clone());
                    true
                }
            }
        };
        if changed {
            self.notify(collection, &record.id);
        }
        Ok(())
    }

    async fn fetch_all(
        &self,
        collection: &str,
        profile: &ProfileScope,
    ) -> Result<Vec<WireRecord>, RemoteError> {
        self.check_online()?;
        Ok(self
            .rows(collection)
            .into_iter()
            .filter(|r| r.profile_id == profile.as_str())
            .collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        let removed = {
            let mut tables = self.tables.lock();
            match tables.get_mut(collection) {
                Some(rows) => {
                    let before = rows.len();
                    rows.retain(|r| r.id != id);
                    rows.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.notify(collection, id);
        }
        Ok(())
    }

    /// One channel serves every collection; receivers filter by name.
    fn subscribe(&self, _collection: &str) -> Option<broadcast::Receiver<RemoteChange>> {
        Some(self.changes.subscribe())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), RemoteError> {
        self.check_online()?;
        self.audit.lock().push(entry.clone());
        Ok(())
    }
}
