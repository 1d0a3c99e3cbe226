//! ScopedStore tests: redundant persistence across two stores, including a
//! primary whose writes fail.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use recsync::error::StorageError;
use recsync::storage::{LocalStore, MemoryStore, ScopedStore};
use recsync::types::{ProfileScope, Record};
use serde_json::{json, Map, Value};

// ============================================================================
// Failing store
// ============================================================================

/// `MemoryStore` whose reads and writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    broken: AtomicBool,
    read_only: AtomicBool,
}

impl FlakyStore {
    fn break_it(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Reads keep working, writes fail.
    fn make_read_only(&self) {
        self.read_only.store(true, Ordering::SeqCst);
    }
}

impl LocalStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StorageError::Read {
                key: key.to_string(),
                message: "device storage unavailable".to_string(),
            });
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        if self.broken.load(Ordering::SeqCst) || self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::Write {
                key: key.to_string(),
                message: "quota exceeded".to_string(),
            });
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }
}

fn record(id: &str, name: &str) -> Record {
    let mut fields = Map::new();
    fields.insert("name".to_string(), json!(name));
    let mut r = Record::with_id(id, fields);
    r.profile_id = "acme".to_string();
    r.created_at = "2024-01-01T00:00:00+00:00".to_string();
    r
}

fn profile() -> ProfileScope {
    ProfileScope::new("acme")
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn write_succeeds_when_only_the_fallback_accepts_it() {
    let primary = Arc::new(FlakyStore::default());
    let fallback = Arc::new(MemoryStore::new());
    let store = ScopedStore::new(primary.clone(), "customers").with_fallback(fallback.clone());

    primary.break_it();
    store
        .save_records(&profile(), &[record("c1", "Acme")])
        .expect("fallback accepted the write");

    // Primary unreadable: the fallback copy is served.
    let loaded = store.load_records(&profile()).unwrap();
    assert_eq!(loaded, vec![record("c1", "Acme")]);
}

#[test]
fn rejected_primary_write_does_not_shadow_the_fallback() {
    let primary = Arc::new(FlakyStore::default());
    let fallback = Arc::new(MemoryStore::new());
    let store = ScopedStore::new(primary.clone(), "customers").with_fallback(fallback.clone());
    store.save_records(&profile(), &[record("c1", "Acme")]).unwrap();

    primary.make_read_only();
    let newer = vec![record("c1", "Acme"), record("c2", "Globex")];
    store.save_records(&profile(), &newer).unwrap();

    let key = profile().records_key("customers");
    assert_eq!(primary.get(&key).unwrap(), None);
    assert_eq!(store.load_records(&profile()).unwrap(), newer);
}

#[test]
fn write_fails_when_no_store_accepts_it() {
    let primary = Arc::new(FlakyStore::default());
    let fallback = Arc::new(FlakyStore::default());
    let store = ScopedStore::new(primary.clone(), "customers").with_fallback(fallback.clone());

    primary.break_it();
    fallback.break_it();
    assert!(store.save_records(&profile(), &[record("c1", "Acme")]).is_err());
}

#[test]
fn dirty_ids_survive_a_broken_primary() {
    let primary = Arc::new(FlakyStore::default());
    let fallback = Arc::new(MemoryStore::new());
    let store = ScopedStore::new(primary.clone(), "customers").with_fallback(fallback);

    let ids: BTreeSet<String> = ["c1", "c2"].iter().map(|s| s.to_string()).collect();
    store.save_dirty(&profile(), &ids).unwrap();

    primary.break_it();
    assert_eq!(store.load_dirty(&profile()), ids);
}

#[cfg(feature = "sqlite")]
#[test]
fn sqlite_primary_with_memory_fallback() {
    use recsync::storage::SqliteStore;

    let primary = Arc::new(SqliteStore::open_in_memory().unwrap());
    let fallback = Arc::new(MemoryStore::new());
    let store = ScopedStore::new(primary.clone(), "customers").with_fallback(fallback.clone());

    let records = vec![record("c1", "Acme"), record("c2", "Globex")];
    store.save_records(&profile(), &records).unwrap();

    let key = profile().records_key("customers");
    assert!(primary.get(&key).unwrap().is_some());
    assert!(fallback.raw(&key).is_some());
    assert_eq!(store.load_records(&profile()).unwrap(), records);
}
