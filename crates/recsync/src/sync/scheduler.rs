//! SyncScheduler: background triggers over `SyncEngine`.
//!
//! One spawned task runs a cycle on each of:
//! - the fixed interval timer (suppressed while an edit form is open),
//! - an application-focus notification,
//! - a remote change notification for the engine's collection, debounced.
//!
//! Cycles started by the scheduler run one at a time; triggers that arrive
//! meanwhile are picked up when the running cycle finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::remote::RemoteChange;

use super::engine::SyncEngine;
use super::types::{SyncOutcome, SyncReport};

const DEFAULT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Periodic cycle interval (default: 30 000)
    pub interval_ms: Option<u64>,
    /// Quiet period after the last remote change before syncing (default: 500)
    pub debounce_ms: Option<u64>,
}

/// What woke the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Interval,
    Focus,
    RemoteChange,
}

// ============================================================================
// SyncScheduler
// ============================================================================

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    focus: Arc<Notify>,
    form_open: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Spawn the trigger loop on the current tokio runtime.
    pub fn start(engine: Arc<SyncEngine>, options: SchedulerOptions) -> Self {
        let interval = Duration::from_millis(options.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS));
        let debounce = Duration::from_millis(options.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS));

        let focus = Arc::new(Notify::new());
        let form_open = Arc::new(AtomicBool::new(false));
        let disposed = Arc::new(AtomicBool::new(false));

        // Subscribe before spawning so no change is missed in between.
        let collection = engine.collection().to_string();
        let changes = engine
            .remote
            .as_ref()
            .and_then(|remote| remote.subscribe(&collection));

        let task = tokio::spawn(run_loop(LoopState {
            engine: Arc::clone(&engine),
            collection,
            changes,
            interval,
            debounce,
            focus: Arc::clone(&focus),
            form_open: Arc::clone(&form_open),
            disposed: Arc::clone(&disposed),
        }));

        Self {
            engine,
            focus,
            form_open,
            disposed,
            task: Mutex::new(Some(task)),
        }
    }

    /// The application regained focus; sync as soon as possible.
    pub fn notify_focus(&self) {
        self.focus.notify_one();
    }

    /// While set, interval ticks are skipped. Focus and remote-change
    /// triggers still run.
    pub fn set_form_open(&self, open: bool) {
        self.form_open.store(open, Ordering::SeqCst);
    }

    pub fn is_form_open(&self) -> bool {
        self.form_open.load(Ordering::SeqCst)
    }

    /// Run a cycle now, outside the trigger loop.
    pub async fn flush(&self) -> SyncReport {
        self.engine.run_cycle().await
    }

    /// Stop the trigger loop. The engine itself is left alone.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ----------------------------------------------------------------------------
// Trigger loop
// ----------------------------------------------------------------------------

struct LoopState {
    engine: Arc<SyncEngine>,
    collection: String,
    changes: Option<broadcast::Receiver<RemoteChange>>,
    interval: Duration,
    debounce: Duration,
    focus: Arc<Notify>,
    form_open: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
}

async fn run_loop(mut state: LoopState) {
    // `interval` fires immediately on the first tick; start one period out.
    let mut ticker = tokio::time::interval_at(Instant::now() + state.interval, state.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut debounce_until: Option<Instant> = None;

    loop {
        if state.disposed.load(Ordering::SeqCst) || state.engine.is_disposed() {
            break;
        }

        let trigger = tokio::select! {
            _ = ticker.tick() => {
                if state.form_open.load(Ordering::SeqCst) {
                    tracing::debug!(
                        collection = %state.collection,
                        "interval sync skipped: edit form open"
                    );
                    continue;
                }
                Trigger::Interval
            }
            _ = state.focus.notified() => Trigger::Focus,
            seen = next_change(&mut state.changes, &state.collection) => {
                if seen {
                    debounce_until = Some(Instant::now() + state.debounce);
                }
                continue;
            }
            _ = debounce_elapsed(debounce_until) => {
                debounce_until = None;
                Trigger::RemoteChange
            }
        };

        let report = state.engine.run_cycle().await;
        if report.outcome != SyncOutcome::Skipped {
            tracing::debug!(
                collection = %state.collection,
                trigger = ?trigger,
                outcome = ?report.outcome,
                "scheduled sync finished"
            );
        }
    }

    tracing::debug!(collection = %state.collection, "sync scheduler stopped");
}

/// Resolve `true` on the next change for `collection`. Never resolves once
/// the channel is gone.
async fn next_change(
    changes: &mut Option<broadcast::Receiver<RemoteChange>>,
    collection: &str,
) -> bool {
    loop {
        let Some(rx) = changes.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(change) if change.collection == collection => return true,
            Ok(_) => continue,
            // Missed notifications may have covered this collection.
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(
                    collection = %collection,
                    skipped,
                    "remote change stream lagged"
                );
                return true;
            }
            Err(RecvError::Closed) => *changes = None,
        }
    }
}

async fn debounce_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
