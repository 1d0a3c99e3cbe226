//! Snapshot change feed for the UI layer.
//!
//! Listeners are notified after every commit of the local snapshot. The
//! listener list is copied before notifying, so a listener may subscribe or
//! unsubscribe from inside its callback. A panicking listener is isolated
//! and does not affect the engine or other listeners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::ProfileScope;

/// Handle returned by [`ChangeFeed::subscribe`].
pub type SubscriptionId = u64;

pub type ChangeListener = dyn Fn(&SnapshotChange) + Send + Sync;

/// Why the local snapshot changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    /// Optimistic commit of a caller mutation.
    LocalCommit,
    /// Merged result of a sync cycle.
    SyncMerge,
    /// A failed mutation was reverted.
    Rollback,
    Delete,
    /// Snapshot loaded from storage (startup, profile switch).
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotChange {
    pub profile: ProfileScope,
    pub reason: ChangeReason,
    /// Number of records in the committed snapshot.
    pub len: usize,
}

#[derive(Default)]
pub struct ChangeFeed {
    listeners: Mutex<Vec<(SubscriptionId, Arc<ChangeListener>)>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&SnapshotChange) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Does nothing for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub(crate) fn emit(&self, change: &SnapshotChange) {
        let snapshot: Vec<Arc<ChangeListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for cb in snapshot {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(change)));
            if outcome.is_err() {
                tracing::warn!(reason = ?change.reason, "snapshot listener panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
