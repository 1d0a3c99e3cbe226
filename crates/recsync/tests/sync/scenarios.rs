//! End-to-end scenarios: merge outcomes, crash recovery, offline work and
//! convergence between devices sharing one remote.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{json, Value};

use recsync::error::{EngineError, RemoteError};
use recsync::mapper::{RemoteMapper, WireRecord};
use recsync::remote::{MemoryRemote, RemoteBackend};
use recsync::storage::{MemoryStore, ScopedStore};
use recsync::sync::{EngineOptions, SyncEngine, SyncErrorKind, SyncOutcome};
use recsync::types::{ProfileScope, Record};

use super::support::*;

fn by_id(records: &[Record]) -> HashMap<String, String> {
    records
        .iter()
        .map(|r| {
            let name = r.get("name").and_then(Value::as_str).unwrap_or_default();
            (r.id.clone(), name.to_string())
        })
        .collect()
}

/// Write `record` to the shared table as another device would.
async fn write_elsewhere(remote: &MemoryRemote, record: &Record) {
    let wire = RemoteMapper::default().to_remote(record, &ProfileScope::new("acme"));
    remote.upsert(COLLECTION, &wire).await.unwrap();
}

fn device(local: Arc<MemoryStore>, remote: Arc<MockRemote>) -> SyncEngine {
    let store = Arc::new(ScopedStore::new(local, COLLECTION));
    let engine = SyncEngine::new(EngineOptions::new(store).remote(remote).profile(profile()));
    engine.init().unwrap();
    engine
}

// ============================================================================
// Merge scenarios
// ============================================================================

#[tokio::test]
async fn dirty_local_clean_remote_and_new_remote_records_merge() {
    let h = Harness::new();
    h.engine.save(vec![customer("b", "B original")]).await.unwrap();

    // Elsewhere: b is updated and c is created.
    let mut b = h.engine.get("b").unwrap();
    b.set("name", json!("B updated elsewhere"));
    write_elsewhere(&h.remote.backing, &b).await;
    let mut c = customer("c", "C new elsewhere");
    c.profile_id = "acme".to_string();
    c.created_at = "2024-03-01T09:00:00+00:00".to_string();
    write_elsewhere(&h.remote.backing, &c).await;

    // Here: a is created but not synced yet.
    let mut next = h.engine.records();
    next.push(customer("a", "A local"));
    h.engine.commit_local(next).unwrap();

    let report = h.engine.sync(&profile()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Success);
    let merged = by_id(&h.engine.records());
    assert_eq!(merged.len(), 3);
    assert_eq!(merged["a"], "A local");
    assert_eq!(merged["b"], "B updated elsewhere");
    assert_eq!(merged["c"], "C new elsewhere");
    assert!(h.engine.get_dirty_ids().is_empty());
}

#[tokio::test]
async fn failed_push_with_successful_fetch_is_a_partial_failure() {
    let h = Harness::new();
    h.remote.on_upsert(|wire| {
        if wire.id == "d" {
            Err(RemoteError::network("socket closed"))
        } else {
            Ok(())
        }
    });
    h.engine
        .commit_local(vec![customer("d", "D local"), customer("e", "E local")])
        .unwrap();

    let report = h.engine.sync(&profile()).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::PartialFailure);
    assert_eq!(report.push_error("d").map(|e| e.kind), Some(SyncErrorKind::Network));
    assert_eq!(h.engine.get_dirty_ids(), BTreeSet::from(["d".to_string()]));
    assert_eq!(by_id(&h.engine.records())["d"], "D local");
}

#[tokio::test]
async fn dirty_ids_from_a_crashed_session_are_pushed_on_restart() {
    let local = Arc::new(MemoryStore::new());
    let remote = Arc::new(MockRemote::new());

    {
        let crashed = device(local.clone(), remote.clone());
        crashed.commit_local(vec![customer("e", "E pending")]).unwrap();
        // No sync, no dispose.
    }

    let restarted = device(local.clone(), remote.clone());
    assert_eq!(restarted.get_dirty_ids(), BTreeSet::from(["e".to_string()]));

    restarted.sync(&profile()).await.unwrap();

    assert_eq!(remote.upsert_ids(), vec!["e"]);
    assert!(restarted.get_dirty_ids().is_empty());
}

// ============================================================================
// Offline work
// ============================================================================

#[tokio::test]
async fn records_created_offline_are_kept_and_pushed_later() {
    let h = Harness::new();
    h.remote.backing.set_offline(true);

    h.engine.commit_local(vec![customer("x", "Offline draft")]).unwrap();
    let err = h.engine.sync(&profile()).await.unwrap_err();

    assert!(matches!(err, EngineError::Network(_)));
    assert_eq!(ids(&h.engine.records()), vec!["x"]);
    assert_eq!(h.engine.get_dirty_ids(), BTreeSet::from(["x".to_string()]));

    h.remote.backing.set_offline(false);
    h.engine.sync(&profile()).await.unwrap();

    assert!(h.remote.backing.get(COLLECTION, "x").is_some());
    assert!(h.engine.get_dirty_ids().is_empty());
}

#[tokio::test]
async fn offline_save_is_refused_but_offline_commit_is_kept() {
    let h = Harness::new();
    h.remote.backing.set_offline(true);

    assert!(h.engine.save(vec![customer("x", "Draft")]).await.is_err());
    assert!(h.engine.records().is_empty());

    h.engine.commit_local(vec![customer("x", "Draft")]).unwrap();
    assert_eq!(ids(&h.engine.records()), vec!["x"]);
}

// ============================================================================
// Convergence
// ============================================================================

#[tokio::test]
async fn two_devices_converge_after_one_more_fetch() {
    let shared = Arc::new(MemoryRemote::new());
    let laptop = device(
        Arc::new(MemoryStore::new()),
        Arc::new(MockRemote::over(shared.clone())),
    );
    let phone = device(
        Arc::new(MemoryStore::new()),
        Arc::new(MockRemote::over(shared.clone())),
    );

    laptop.commit_local(vec![customer("l1", "From laptop")]).unwrap();
    phone.commit_local(vec![customer("p1", "From phone")]).unwrap();

    laptop.sync(&profile()).await.unwrap();
    phone.sync(&profile()).await.unwrap();
    laptop.sync(&profile()).await.unwrap();

    assert_eq!(laptop.records(), phone.records());
    assert_eq!(ids(&laptop.records()), vec!["l1", "p1"]);
    assert!(laptop.get_dirty_ids().is_empty());
    assert!(phone.get_dirty_ids().is_empty());
}

#[tokio::test]
async fn concurrent_edits_to_a_clean_record_resolve_last_writer_wins() {
    let shared = Arc::new(MemoryRemote::new());
    let laptop = device(
        Arc::new(MemoryStore::new()),
        Arc::new(MockRemote::over(shared.clone())),
    );
    let phone = device(
        Arc::new(MemoryStore::new()),
        Arc::new(MockRemote::over(shared.clone())),
    );
    laptop.save(vec![customer("c1", "Acme")]).await.unwrap();
    phone.sync(&profile()).await.unwrap();

    laptop
        .save(vec![renamed(&laptop.get("c1").unwrap(), "Laptop edit")])
        .await
        .unwrap();
    phone
        .save(vec![renamed(&phone.get("c1").unwrap(), "Phone edit")])
        .await
        .unwrap();
    laptop.sync(&profile()).await.unwrap();

    assert_eq!(names(&laptop.records()), vec!["Phone edit"]);
    assert_eq!(laptop.records(), phone.records());
}

// ============================================================================
// Column mapping
// ============================================================================

#[tokio::test]
async fn zero_in_a_dedicated_column_is_a_real_value() {
    let remote = Arc::new(MockRemote::new());
    let h = Harness::build(remote, |o| o.mapper(RemoteMapper::same_names(&["balance"])));

    let mut data = serde_json::Map::new();
    data.insert("id".to_string(), json!("c1"));
    data.insert("name".to_string(), json!("Acme"));
    data.insert("balance".to_string(), json!(10));
    let mut columns = serde_json::Map::new();
    columns.insert("balance".to_string(), json!(0));
    let wire = WireRecord {
        id: "c1".to_string(),
        profile_id: "acme".to_string(),
        created_at: Some("2024-01-01T00:00:00+00:00".to_string()),
        columns,
        data: Value::Object(data),
    };
    h.remote.backing.upsert(COLLECTION, &wire).await.unwrap();

    h.engine.sync(&profile()).await.unwrap();

    let c1 = h.engine.get("c1").unwrap();
    assert_eq!(c1.get("balance"), Some(&json!(0)));
    assert_eq!(c1.get("name"), Some(&json!("Acme")));
}

#[tokio::test]
async fn mapped_fields_are_sent_as_columns_and_in_the_payload() {
    let remote = Arc::new(MockRemote::new());
    let h = Harness::build(remote, |o| o.mapper(RemoteMapper::new([("name", "display_name")])));

    h.engine.save(vec![customer("c1", "Acme")]).await.unwrap();

    let sent = h.remote.upsert_calls();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].columns.get("display_name"), Some(&json!("Acme")));
    assert_eq!(sent[0].data["name"], json!("Acme"));
    assert_eq!(sent[0].data["updated_by"], json!("acme"));
    assert_eq!(sent[0].profile_id, "acme");
}
