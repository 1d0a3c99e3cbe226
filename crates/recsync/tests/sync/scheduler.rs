//! SyncScheduler tests: interval, focus, debounced remote changes and the
//! edit-form guard. Time is paused, so sleeps advance the mock clock.

use std::sync::Arc;
use std::time::Duration;

use recsync::mapper::RemoteMapper;
use recsync::remote::RemoteBackend;
use recsync::sync::{SchedulerOptions, SyncOutcome, SyncScheduler};
use recsync::types::ProfileScope;

use super::support::*;

fn options(interval_ms: u64, debounce_ms: u64) -> SchedulerOptions {
    SchedulerOptions {
        interval_ms: Some(interval_ms),
        debounce_ms: Some(debounce_ms),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn interval_runs_a_cycle_per_period() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(h.engine.clone(), options(1_000, 100));

    tokio::time::sleep(Duration::from_millis(3_500)).await;

    assert_eq!(h.remote.fetch_calls(), 3);
    scheduler.dispose();
}

#[tokio::test(start_paused = true)]
async fn interval_pushes_offline_work() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(h.engine.clone(), options(1_000, 100));
    h.engine.commit_local(vec![customer("c1", "Acme")]).unwrap();

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert!(h.remote.backing.get(COLLECTION, "c1").is_some());
    assert!(h.engine.get_dirty_ids().is_empty());
    scheduler.dispose();
}

#[tokio::test(start_paused = true)]
async fn open_form_suppresses_interval_cycles() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(h.engine.clone(), options(1_000, 100));
    scheduler.set_form_open(true);
    assert!(scheduler.is_form_open());

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(h.remote.fetch_calls(), 0);

    scheduler.set_form_open(false);
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(h.remote.fetch_calls(), 1);
    scheduler.dispose();
}

#[tokio::test(start_paused = true)]
async fn focus_triggers_a_cycle_even_with_a_form_open() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(h.engine.clone(), options(60_000, 100));
    scheduler.set_form_open(true);

    scheduler.notify_focus();
    settle().await;

    assert_eq!(h.remote.fetch_calls(), 1);
    scheduler.dispose();
}

#[tokio::test(start_paused = true)]
async fn remote_changes_are_debounced_into_one_cycle() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(h.engine.clone(), options(60_000, 500));
    let mapper = RemoteMapper::default();
    let elsewhere = ProfileScope::new("acme");

    for (i, name) in ["One", "Two", "Three"].iter().enumerate() {
        let mut record = customer(&format!("r{i}"), name);
        record.profile_id = "acme".to_string();
        h.remote
            .backing
            .upsert(COLLECTION, &mapper.to_remote(&record, &elsewhere))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(h.remote.fetch_calls(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(h.remote.fetch_calls(), 1);
    assert_eq!(ids(&h.engine.records()), vec!["r0", "r1", "r2"]);
    scheduler.dispose();
}

#[tokio::test(start_paused = true)]
async fn changes_to_other_collections_are_ignored() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(h.engine.clone(), options(60_000, 100));

    let record = customer("i1", "Invoice");
    h.remote
        .backing
        .upsert(
            "invoices",
            &RemoteMapper::default().to_remote(&record, &profile()),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(h.remote.fetch_calls(), 0);
    scheduler.dispose();
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_all_triggers() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(h.engine.clone(), options(1_000, 100));

    scheduler.dispose();
    assert!(scheduler.is_disposed());
    scheduler.notify_focus();
    tokio::time::sleep(Duration::from_millis(5_000)).await;

    assert_eq!(h.remote.fetch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn disposing_the_engine_ends_the_loop() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(h.engine.clone(), options(1_000, 100));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.remote.fetch_calls(), 1);

    h.engine.dispose();
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(h.remote.fetch_calls(), 1);
    drop(scheduler);
}

#[tokio::test(start_paused = true)]
async fn flush_runs_immediately() {
    let h = Harness::new();
    let scheduler = SyncScheduler::start(Arc::clone(&h.engine), options(60_000, 100));
    h.engine.commit_local(vec![customer("c1", "Acme")]).unwrap();

    let report = scheduler.flush().await;

    assert_eq!(report.outcome, SyncOutcome::Success);
    assert_eq!(report.pushed, vec!["c1"]);
    scheduler.dispose();
}
