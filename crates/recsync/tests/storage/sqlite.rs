//! SqliteStore tests: the `LocalStore` contract on SQLite, in memory and on
//! disk.

use recsync::storage::{LocalStore, SqliteStore};
use serde_json::json;

fn make_store() -> SqliteStore {
    SqliteStore::open_in_memory().expect("open in-memory DB")
}

fn temp_db_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("recsync-{}.db", uuid::Uuid::new_v4()))
}

#[test]
fn missing_key_reads_none() {
    let store = make_store();
    assert!(store.get("recsync:acme:customers:records").unwrap().is_none());
}

#[test]
fn set_get_and_overwrite() {
    let store = make_store();
    store.set("k", &json!({ "n": 1 })).unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!({ "n": 1 })));

    store.set("k", &json!({ "n": 2 })).unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!({ "n": 2 })));
}

#[test]
fn remove_deletes_the_row() {
    let store = make_store();
    store.set("k", &json!(["a", "b"])).unwrap();
    store.remove("k").unwrap();
    assert!(store.get("k").unwrap().is_none());
    // Removing again is fine.
    store.remove("k").unwrap();
}

#[test]
fn keys_are_independent() {
    let store = make_store();
    store.set("a", &json!(1)).unwrap();
    store.set("b", &json!(2)).unwrap();
    store.remove("a").unwrap();
    assert_eq!(store.get("b").unwrap(), Some(json!(2)));
}

#[test]
fn file_store_survives_reopen() {
    let path = temp_db_path();
    let path_str = path.to_string_lossy().to_string();

    {
        let store = SqliteStore::open(&path_str).expect("open file DB");
        store.set("k", &json!({ "kept": true })).unwrap();
    }

    let reopened = SqliteStore::open(&path_str).expect("reopen file DB");
    assert_eq!(reopened.get("k").unwrap(), Some(json!({ "kept": true })));

    drop(reopened);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
    }
}
