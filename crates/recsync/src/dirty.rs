//! Dirty Set Tracker: ids of records with local changes the remote has not
//! confirmed yet.
//!
//! The in-memory set is authoritative for the running session. Every change
//! is persisted to the profile-scoped dirty key in both stores of the
//! `ScopedStore`; a failed write is logged and never surfaces as an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::ScopedStore;
use crate::types::{ProfileScope, RecordId};

pub struct DirtySet {
    store: Arc<ScopedStore>,
    profile: Mutex<Option<ProfileScope>>,
    ids: Mutex<BTreeSet<RecordId>>,
}

impl DirtySet {
    pub fn new(store: Arc<ScopedStore>) -> Self {
        Self {
            store,
            profile: Mutex::new(None),
            ids: Mutex::new(BTreeSet::new()),
        }
    }

    /// Reload the set persisted for `profile`, replacing the in-memory set.
    /// Called at startup and whenever the active profile changes.
    pub fn load(&self, profile: &ProfileScope) {
        let loaded = self.store.load_dirty(profile);
        if !loaded.is_empty() {
            tracing::debug!(profile = %profile, count = loaded.len(), "restored dirty ids");
        }
        *self.profile.lock() = Some(profile.clone());
        *self.ids.lock() = loaded;
    }

    /// Detach from the current profile and forget the in-memory set. The
    /// persisted copy is left untouched.
    pub fn dispose(&self) {
        *self.profile.lock() = None;
        self.ids.lock().clear();
    }

    /// Mark `ids` dirty and persist.
    pub fn add<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<RecordId>,
    {
        let changed = {
            let mut set = self.ids.lock();
            let mut changed = false;
            for id in ids {
                changed |= set.insert(id.into());
            }
            changed
        };
        if changed {
            self.persist();
        }
    }

    /// Remove `ids` from the set and persist.
    pub fn clear<'a, I>(&self, ids: I)
    where
        I: IntoIterator<Item = &'a RecordId>,
    {
        let changed = {
            let mut set = self.ids.lock();
            let mut changed = false;
            for id in ids {
                changed |= set.remove(id);
            }
            changed
        };
        if changed {
            self.persist();
        }
    }

    /// Replace the whole set (rollback) and persist.
    pub fn replace(&self, ids: BTreeSet<RecordId>) {
        *self.ids.lock() = ids;
        self.persist();
    }

    pub fn snapshot(&self) -> BTreeSet<RecordId> {
        self.ids.lock().clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    /// Write the current set to storage. Without an active profile there is
    /// nowhere to write and the call is a no-op.
    pub fn persist(&self) {
        let Some(profile) = self.profile.lock().clone() else {
            return;
        };
        let ids = self.snapshot();
        if let Err(e) = self.store.save_dirty(&profile, &ids) {
            tracing::warn!(
                profile = %profile,
                count = ids.len(),
                error = %e,
                "failed to persist dirty ids, keeping in-memory set"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
