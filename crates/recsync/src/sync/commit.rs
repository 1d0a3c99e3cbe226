//! Optimistic commit and rollback of caller mutations.
//!
//! Every caller-facing mutation commits locally first so the UI reflects it
//! before any network round-trip. `save` then runs a sync cycle and, if the
//! remote did not confirm the caller's records, reverts exactly what it
//! committed. Mutations that landed while it was waiting are kept.

use std::collections::{BTreeSet, HashMap};

use crate::{
    error::{EngineError, Result},
    events::ChangeReason,
    remote::AuditAction,
    types::{ProfileScope, Record, RecordId},
};

use super::engine::SyncEngine;
use super::types::{SyncErrorKind, SyncOutcome};

/// What a local commit changed relative to the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCommit {
    /// New or modified ids (now dirty).
    pub changed: Vec<RecordId>,
    /// Ids present before and absent now.
    pub removed: Vec<RecordId>,
}

impl SyncEngine {
    /// Normalize `records`, mark changed ids dirty, commit them as the new
    /// local snapshot and persist. No remote step: the changes are pushed by
    /// the next cycle.
    pub fn commit_local(&self, records: Vec<Record>) -> Result<LocalCommit> {
        self.check_disposed()?;
        let profile = self.require_profile()?;
        let previous = self.records();
        let previous_dirty = self.dirty.snapshot();
        self.commit_local_from(&profile, records, previous, previous_dirty)
            .map(|(commit, _)| commit)
    }

    /// Returns the diff and the committed records.
    fn commit_local_from(
        &self,
        profile: &ProfileScope,
        records: Vec<Record>,
        previous: Vec<Record>,
        previous_dirty: BTreeSet<RecordId>,
    ) -> Result<(LocalCommit, Vec<Record>)> {
        let normalized = self.normalizer.normalize(records, profile);
        let diff = diff(&previous, &normalized);

        // Ids enter the dirty set before the records are committed.
        self.dirty.add(diff.changed.iter().cloned());
        self.dirty.clear(&diff.removed);

        let committed = normalized.clone();
        if let Err(e) = self.commit_snapshot(profile, normalized, ChangeReason::LocalCommit) {
            tracing::warn!(profile = %profile, error = %e, "local commit not persisted, reverting");
            self.rollback(profile, previous, previous_dirty);
            return Err(e.into());
        }

        Ok((diff, committed))
    }

    /// Optimistically commit `records` as the new full collection, then push
    /// and reconcile.
    ///
    /// Fails when remote configuration is missing or the push of any caller
    /// record failed. Every record this call added, changed or removed is
    /// then put back to its pre-call version and dirty membership, locally
    /// and, for rows the remote already took, remotely. Records touched by
    /// other mutations in the meantime keep their newer state. A fetch
    /// failure after confirmed pushes is not a failure of the save: the
    /// records are stored remotely and the next cycle reconciles.
    pub async fn save(&self, records: Vec<Record>) -> Result<()> {
        self.check_disposed()?;
        let profile = self.require_profile()?;
        let previous = self.records();
        let previous_dirty = self.dirty.snapshot();

        let (commit, committed) =
            self.commit_local_from(&profile, records, previous.clone(), previous_dirty.clone())?;
        let touched: Vec<RecordId> = commit
            .changed
            .iter()
            .chain(&commit.removed)
            .cloned()
            .collect();

        if self.remote.is_none() {
            self.revert(&profile, &previous, &previous_dirty, &committed, &touched);
            return Err(EngineError::MissingConfiguration(
                "no remote backend configured; changes were not saved".to_string(),
            ));
        }

        for id in &commit.removed {
            self.delete_remote(&profile, id).await;
        }

        let report = self.run_cycle().await;

        let failed: Vec<&RecordId> = commit
            .changed
            .iter()
            .filter(|id| report.failed.contains(*id))
            .collect();
        if !failed.is_empty() {
            let rejected = failed.iter().any(|id| {
                report
                    .push_error(id)
                    .is_some_and(|e| e.kind == SyncErrorKind::RemoteRejection)
            });
            let message = failed
                .iter()
                .filter_map(|id| report.push_error(id).map(|e| e.error.clone()))
                .next()
                .unwrap_or_else(|| "push failed".to_string());
            let ids: Vec<RecordId> = failed.into_iter().cloned().collect();

            tracing::warn!(
                profile = %profile,
                ids = ?ids,
                error = %message,
                "save failed, rolling back"
            );
            let reverted = self.revert(&profile, &previous, &previous_dirty, &committed, &touched);

            // Rows the remote already took: confirmed upserts and deletes.
            let applied: Vec<&RecordId> = reverted
                .iter()
                .filter(|id| report.pushed.contains(*id) || commit.removed.contains(*id))
                .collect();
            self.undo_remote(&profile, &previous, applied).await;

            return Err(if rejected {
                EngineError::RemoteRejection { ids, message }
            } else {
                EngineError::Network(message)
            });
        }

        if report.outcome == SyncOutcome::Failure {
            tracing::warn!(
                profile = %profile,
                error = %report.message().unwrap_or_default(),
                "records pushed but fetch failed; reconciling on the next cycle"
            );
        }

        if !commit.changed.is_empty() {
            self.audit(&profile, AuditAction::Save, commit.changed).await;
        }
        Ok(())
    }

    /// Remove a record locally and, best effort, remotely. The id leaves the
    /// dirty set and is not re-added. Returns whether a local record existed.
    ///
    /// If the remote delete fails the row is still on the remote, and since
    /// the id is no longer dirty the next cycle's fetch brings the record
    /// back as a clean remote copy.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.check_disposed()?;
        let profile = self.require_profile()?;

        let mut records = self.records();
        let before = records.len();
        records.retain(|r| r.id != id);
        let existed = records.len() != before;

        if existed {
            self.commit_snapshot(&profile, records, ChangeReason::Delete)?;
        }
        self.dirty.clear(&[id.to_string()]);

        self.delete_remote(&profile, id).await;
        self.audit(&profile, AuditAction::Delete, vec![id.to_string()])
            .await;
        Ok(existed)
    }

    /// Put the remote rows of `ids` back to their `previous` version:
    /// re-upsert what existed before, delete what did not. An id whose
    /// previous version cannot be re-upserted is marked dirty, so the next
    /// cycle pushes it.
    async fn undo_remote(&self, profile: &ProfileScope, previous: &[Record], ids: Vec<&RecordId>) {
        let Some(remote) = self.remote.clone() else {
            return;
        };
        for id in ids {
            let Some(record) = previous.iter().find(|r| &r.id == id) else {
                self.delete_remote(profile, id).await;
                continue;
            };
            let wire = self.mapper.to_remote(record, profile);
            if let Err(e) = remote.upsert(self.collection(), &wire).await {
                tracing::warn!(
                    profile = %profile,
                    id = %id,
                    error = %e,
                    "remote undo failed, record stays dirty"
                );
                if self.get(id).is_some() {
                    self.dirty.add([id.clone()]);
                }
            }
        }
    }

    async fn delete_remote(&self, profile: &ProfileScope, id: &str) {
        let Some(remote) = self.remote.as_ref() else {
            return;
        };
        if let Err(e) = remote.delete(self.collection(), id).await {
            tracing::warn!(profile = %profile, id = %id, error = %e, "remote delete failed");
        }
    }
}

/// Ids new or modified in `next`, and ids dropped from `previous`.
fn diff(previous: &[Record], next: &[Record]) -> LocalCommit {
    let before: HashMap<&str, &Record> = previous.iter().map(|r| (r.id.as_str(), r)).collect();
    let after: BTreeSet<&str> = next.iter().map(|r| r.id.as_str()).collect();

    let changed = next
        .iter()
        .filter(|r| before.get(r.id.as_str()).copied() != Some(*r))
        .map(|r| r.id.clone())
        .collect();
    let removed = previous
        .iter()
        .filter(|r| !after.contains(r.id.as_str()))
        .map(|r| r.id.clone())
        .collect();

    LocalCommit { changed, removed }
}
