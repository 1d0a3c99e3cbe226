//! SyncEngine: owns the local snapshot and dirty set for one collection and
//! drives the push → fetch → merge → commit → clear cycle.
//!
//! Overlapping cycles are allowed unless `single_flight` is set. Upserts are
//! idempotent and merge prefers local versions of dirty ids, so an
//! interleaved cycle costs at most one redundant round-trip. A cycle never
//! returns `Err`: failures are collected in the `SyncReport`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as TokioMutex;

use crate::{
    dirty::DirtySet,
    error::{EngineError, Result, StorageError},
    events::{ChangeFeed, ChangeReason, SnapshotChange},
    mapper::RemoteMapper,
    merge::merge,
    normalize::{CanonicalIds, Normalizer},
    remote::{AuditAction, AuditEntry, RemoteBackend},
    storage::ScopedStore,
    types::{ProfileScope, Record, RecordId},
};

use super::types::*;

// ============================================================================
// SyncEngine
// ============================================================================

pub struct SyncEngine {
    pub(crate) store: Arc<ScopedStore>,
    pub(crate) remote: Option<Arc<dyn RemoteBackend>>,
    pub(crate) mapper: RemoteMapper,
    pub(crate) normalizer: Arc<dyn Normalizer>,
    pub(crate) dirty: DirtySet,
    profile: Mutex<Option<ProfileScope>>,
    snapshot: Mutex<Vec<Record>>,
    feed: ChangeFeed,
    cycle_lock: Option<TokioMutex<()>>,
    in_flight: AtomicUsize,
    last_report: Mutex<Option<SyncReport>>,
    disposed: AtomicBool,
    on_error: Option<Arc<SyncErrorCallback>>,
    on_state_change: Option<Arc<SyncStateCallback>>,
}

impl SyncEngine {
    /// Create an engine. Call [`init`](Self::init) before use to load the
    /// persisted snapshot and dirty set.
    pub fn new(options: EngineOptions) -> Self {
        let dirty = DirtySet::new(Arc::clone(&options.store));
        Self {
            store: options.store,
            remote: options.remote,
            mapper: options.mapper.unwrap_or_default(),
            normalizer: options.normalizer.unwrap_or_else(|| Arc::new(CanonicalIds)),
            dirty,
            profile: Mutex::new(options.profile),
            snapshot: Mutex::new(Vec::new()),
            feed: ChangeFeed::new(),
            cycle_lock: options.single_flight.then(|| TokioMutex::new(())),
            in_flight: AtomicUsize::new(0),
            last_report: Mutex::new(None),
            disposed: AtomicBool::new(false),
            on_error: options.on_error,
            on_state_change: options.on_state_change,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load the snapshot and dirty set of the configured profile. Without a
    /// profile this is a no-op until [`activate`](Self::activate).
    pub fn init(&self) -> Result<()> {
        self.check_disposed()?;
        match self.profile() {
            Some(profile) => self.load(&profile),
            None => Ok(()),
        }
    }

    /// Switch the active profile and reload its persisted state.
    pub fn activate(&self, profile: ProfileScope) -> Result<()> {
        self.check_disposed()?;
        if profile.is_empty() {
            return Err(EngineError::MissingConfiguration(
                "profile scope is empty".to_string(),
            ));
        }
        *self.profile.lock() = Some(profile.clone());
        self.load(&profile)
    }

    /// Tear down: drop in-memory state and listeners. Persisted state is
    /// kept for the next session. Later calls fail with `Disposed`.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.dirty.dispose();
        self.snapshot.lock().clear();
        self.feed.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn load(&self, profile: &ProfileScope) -> Result<()> {
        let records = self.store.load_records(profile)?;
        self.dirty.load(profile);
        let len = records.len();
        *self.snapshot.lock() = records;
        tracing::debug!(
            profile = %profile,
            records = len,
            dirty = self.dirty.len(),
            "loaded local snapshot"
        );
        self.emit(profile, ChangeReason::Reload, len);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn profile(&self) -> Option<ProfileScope> {
        self.profile.lock().clone()
    }

    pub fn collection(&self) -> &str {
        self.store.collection()
    }

    /// Copy of the committed local snapshot.
    pub fn records(&self) -> Vec<Record> {
        self.snapshot.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.snapshot.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Ids with unconfirmed local changes.
    pub fn get_dirty_ids(&self) -> BTreeSet<RecordId> {
        self.dirty.snapshot()
    }

    /// Subscribe here to follow snapshot commits.
    pub fn changes(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn state(&self) -> SyncState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().clone()
    }

    /// Remote backend and active profile are both present.
    pub fn is_configured(&self) -> bool {
        self.remote.is_some() && self.profile().is_some()
    }

    // -----------------------------------------------------------------------
    // Public sync API
    // -----------------------------------------------------------------------

    /// Run one cycle for `profile`, activating it first if another profile
    /// is active. A partial failure is `Ok`; only a failed fetch is `Err`.
    /// Without remote configuration this is a no-op returning a `Skipped`
    /// report.
    pub async fn sync(&self, profile: &ProfileScope) -> Result<SyncReport> {
        self.check_disposed()?;
        if self.profile().as_ref() != Some(profile) {
            self.activate(profile.clone())?;
        }

        let report = self.run_cycle().await;
        match report.to_error() {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Run one cycle against the active profile.
    pub async fn run_cycle(&self) -> SyncReport {
        if self.is_disposed() {
            return SyncReport::skipped("sync engine disposed");
        }

        let _guard = match &self.cycle_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        if self.in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            self.report_state(SyncState::Syncing);
        }
        let report = self.cycle_impl().await;
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.report_state(SyncState::Idle);
        }

        *self.last_report.lock() = Some(report.clone());
        report
    }

    // -----------------------------------------------------------------------
    // Cycle Implementation
    // -----------------------------------------------------------------------

    async fn cycle_impl(&self) -> SyncReport {
        let Some(remote) = self.remote.clone() else {
            tracing::debug!("sync skipped: no remote backend configured");
            return SyncReport::skipped("no remote backend configured");
        };
        let Some(profile) = self.profile() else {
            tracing::debug!("sync skipped: no active profile");
            return SyncReport::skipped("no active profile");
        };
        let collection = self.collection().to_string();
        let mut report = SyncReport::new();

        // 1. Dirty subset of the local snapshot
        let dirty_ids = self.dirty.snapshot();
        let local = self.records();
        let pending: Vec<Record> = local
            .iter()
            .filter(|r| dirty_ids.contains(&r.id))
            .cloned()
            .collect();

        let stale: Vec<RecordId> = dirty_ids
            .iter()
            .filter(|id| !local.iter().any(|r| &r.id == *id))
            .cloned()
            .collect();

        // 2. Push, one upsert per record; failures do not block the rest
        let mut confirmed: Vec<Record> = Vec::with_capacity(pending.len());
        for record in pending {
            let wire = self.mapper.to_remote(&record, &profile);
            match remote.upsert(&collection, &wire).await {
                Ok(()) => confirmed.push(record),
                Err(e) => {
                    tracing::warn!(
                        profile = %profile,
                        id = %record.id,
                        error = %e,
                        "push failed, record stays dirty"
                    );
                    report.failed.push(record.id.clone());
                    let event = push_error(&record.id, &e);
                    self.notify_error(&event);
                    report.errors.push(event);
                }
            }
        }
        report.pushed = confirmed.iter().map(|r| r.id.clone()).collect();

        // 3. Fetch the authoritative snapshot; failure aborts the cycle
        let wires = match remote.fetch_all(&collection, &profile).await {
            Ok(wires) => wires,
            Err(e) => {
                tracing::warn!(
                    profile = %profile,
                    error = %e,
                    "fetch failed, local state untouched"
                );
                let event = SyncErrorEvent {
                    phase: SyncPhase::Fetch,
                    id: None,
                    error: e.message.clone(),
                    kind: e.kind.into(),
                };
                self.notify_error(&event);
                report.errors.push(event);
                report.outcome = SyncOutcome::Failure;
                return report;
            }
        };
        report.fetched = wires.len();

        let mut remote_records = Vec::with_capacity(wires.len());
        for wire in &wires {
            match self.mapper.from_remote(wire) {
                Ok(record) => remote_records.push(record),
                Err(e) => {
                    let event = SyncErrorEvent {
                        phase: SyncPhase::Fetch,
                        id: Some(wire.id.clone()),
                        error: e.to_string(),
                        kind: SyncErrorKind::Decode,
                    };
                    self.notify_error(&event);
                    report.errors.push(event);
                }
            }
        }

        // 4 + 5. Merge against the current snapshot and dirty set, commit
        let committed = {
            let mut snapshot = self.snapshot.lock();
            let dirty_now = self.dirty.snapshot();
            let merged = merge(remote_records, &dirty_now, &snapshot);
            *snapshot = merged;
            let persisted = self.store.save_records(&profile, &snapshot);
            (snapshot.len(), persisted)
        };
        report.committed = committed.0;
        if let Err(e) = committed.1 {
            tracing::warn!(profile = %profile, error = %e, "merged snapshot not persisted");
            let event = persistence_error(&e);
            self.notify_error(&event);
            report.errors.push(event);
        }
        self.emit(&profile, ChangeReason::SyncMerge, report.committed);

        // 6. Clear ids whose exact pushed version is still the local one, and
        //    ids that no longer have a local record
        let cleared: Vec<RecordId> = {
            let snapshot = self.snapshot.lock();
            confirmed
                .iter()
                .filter(|pushed| snapshot.iter().any(|r| r == *pushed))
                .map(|pushed| pushed.id.clone())
                .collect()
        };
        self.dirty.clear(&cleared);
        if !stale.is_empty() {
            tracing::debug!(
                profile = %profile,
                ids = ?stale,
                "dropping dirty ids with no local record"
            );
            self.dirty.clear(&stale);
        }

        // 7. Report
        report.outcome = if report.failed.is_empty() {
            SyncOutcome::Success
        } else {
            SyncOutcome::PartialFailure
        };
        tracing::info!(
            profile = %profile,
            pushed = report.pushed.len(),
            failed = report.failed.len(),
            fetched = report.fetched,
            outcome = ?report.outcome,
            "sync cycle finished"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Snapshot commits (shared with the commit/rollback layer)
    // -----------------------------------------------------------------------

    /// Replace the in-memory snapshot and persist it under the same lock.
    /// The in-memory commit stands even if persistence fails.
    pub(crate) fn commit_snapshot(
        &self,
        profile: &ProfileScope,
        records: Vec<Record>,
        reason: ChangeReason,
    ) -> std::result::Result<(), StorageError> {
        let (len, persisted) = {
            let mut snapshot = self.snapshot.lock();
            *snapshot = records;
            (snapshot.len(), self.store.save_records(profile, &snapshot))
        };
        self.emit(profile, reason, len);
        persisted
    }

    /// Restore a snapshot and dirty set captured before a failed mutation.
    pub(crate) fn rollback(
        &self,
        profile: &ProfileScope,
        records: Vec<Record>,
        dirty: BTreeSet<RecordId>,
    ) {
        if let Err(e) = self.commit_snapshot(profile, records, ChangeReason::Rollback) {
            tracing::warn!(profile = %profile, error = %e, "restored snapshot not persisted");
        }
        self.dirty.replace(dirty);
    }

    /// Undo the part of a local commit covering `ids`. An id goes back to
    /// its `previous` version and dirty membership only while it still holds
    /// the `committed` version; anything changed since is left alone, as are
    /// records outside `ids`. Returns the ids that were reverted.
    pub(crate) fn revert(
        &self,
        profile: &ProfileScope,
        previous: &[Record],
        previous_dirty: &BTreeSet<RecordId>,
        committed: &[Record],
        ids: &[RecordId],
    ) -> Vec<RecordId> {
        let (owned, len, persisted) = {
            let mut snapshot = self.snapshot.lock();
            let owned: Vec<RecordId> = ids
                .iter()
                .filter(|id| find(&snapshot, id) == find(committed, id))
                .cloned()
                .collect();
            let keep: HashSet<&str> = owned.iter().map(String::as_str).collect();
            let restored = restore(previous, &snapshot, &keep);
            *snapshot = restored;
            let persisted = self.store.save_records(profile, &snapshot);
            (owned, snapshot.len(), persisted)
        };
        if let Err(e) = persisted {
            tracing::warn!(profile = %profile, error = %e, "reverted snapshot not persisted");
        }
        self.emit(profile, ChangeReason::Rollback, len);

        let (mark, unmark): (Vec<&RecordId>, Vec<&RecordId>) =
            owned.iter().partition(|id| previous_dirty.contains(*id));
        self.dirty.add(mark.into_iter().cloned());
        self.dirty.clear(unmark);
        owned
    }

    /// Append an audit entry; the outcome is only logged.
    pub(crate) async fn audit(
        &self,
        profile: &ProfileScope,
        action: AuditAction,
        ids: Vec<RecordId>,
    ) {
        let Some(remote) = self.remote.as_ref() else {
            return;
        };
        let entry = AuditEntry::new(profile, self.collection(), action, ids);
        if let Err(e) = remote.append_audit(&entry).await {
            tracing::warn!(profile = %profile, action = ?action, error = %e, "audit append failed");
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    pub(crate) fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn require_profile(&self) -> Result<ProfileScope> {
        self.profile()
            .ok_or_else(|| EngineError::MissingConfiguration("no active profile".to_string()))
    }

    fn emit(&self, profile: &ProfileScope, reason: ChangeReason, len: usize) {
        self.feed.emit(&SnapshotChange {
            profile: profile.clone(),
            reason,
            len,
        });
    }

    fn notify_error(&self, event: &SyncErrorEvent) {
        if let Some(ref on_error) = self.on_error {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                on_error(event);
            }));
        }
    }

    fn report_state(&self, state: SyncState) {
        if let Some(ref on_state_change) = self.on_state_change {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                on_state_change(state);
            }));
        }
    }
}

fn find<'a>(records: &'a [Record], id: &str) -> Option<&'a Record> {
    records.iter().find(|r| r.id == id)
}

/// `previous` in its order, with `keep` ids at their previous version and the
/// rest at their current one, then the current records `previous` lacked.
fn restore(previous: &[Record], current: &[Record], keep: &HashSet<&str>) -> Vec<Record> {
    let now: HashMap<&str, &Record> = current.iter().map(|r| (r.id.as_str(), r)).collect();
    let before: HashSet<&str> = previous.iter().map(|r| r.id.as_str()).collect();

    let mut restored: Vec<Record> = previous
        .iter()
        .filter_map(|r| {
            if keep.contains(r.id.as_str()) {
                Some(r.clone())
            } else {
                now.get(r.id.as_str()).map(|c| (*c).clone())
            }
        })
        .collect();
    restored.extend(
        current
            .iter()
            .filter(|r| !before.contains(r.id.as_str()) && !keep.contains(r.id.as_str()))
            .cloned(),
    );
    restored
}

fn persistence_error(err: &StorageError) -> SyncErrorEvent {
    SyncErrorEvent {
        phase: SyncPhase::Commit,
        id: None,
        error: err.to_string(),
        kind: SyncErrorKind::Persistence,
    }
}
