//! Sync-specific types: engine options, cycle reports and error events.

use std::sync::Arc;

use crate::{
    error::{EngineError, RemoteError, RemoteErrorKind},
    mapper::RemoteMapper,
    normalize::Normalizer,
    remote::RemoteBackend,
    storage::ScopedStore,
    types::{ProfileScope, RecordId},
};

// ============================================================================
// Error events
// ============================================================================

/// Which step of a cycle an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Push,
    Fetch,
    Commit,
}

/// Classification of cycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Transport or connectivity failure.
    Network,
    /// The backend refused a specific record.
    RemoteRejection,
    /// No remote backend or no active profile.
    MissingConfiguration,
    /// Local store write failed.
    Persistence,
    /// A fetched record could not be mapped to the local shape.
    Decode,
}

impl From<RemoteErrorKind> for SyncErrorKind {
    fn from(kind: RemoteErrorKind) -> Self {
        match kind {
            RemoteErrorKind::Network => SyncErrorKind::Network,
            RemoteErrorKind::Rejection => SyncErrorKind::RemoteRejection,
        }
    }
}

/// A cycle error. Collected in `SyncReport::errors`, never returned as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncErrorEvent {
    pub phase: SyncPhase,
    pub id: Option<RecordId>,
    pub error: String,
    pub kind: SyncErrorKind,
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Fetch succeeded and every push was confirmed.
    Success,
    /// Fetch succeeded but some pushes failed; their ids stay dirty.
    PartialFailure,
    /// Fetch failed; local state was left untouched.
    Failure,
    /// Remote configuration is missing; nothing was attempted.
    Skipped,
}

/// Result of one push → fetch → merge → commit cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    /// Ids whose upsert the remote confirmed.
    pub pushed: Vec<RecordId>,
    /// Ids whose upsert failed.
    pub failed: Vec<RecordId>,
    /// Records returned by the fetch.
    pub fetched: usize,
    /// Size of the committed merged snapshot.
    pub committed: usize,
    pub errors: Vec<SyncErrorEvent>,
}

impl SyncReport {
    pub(crate) fn new() -> Self {
        Self {
            outcome: SyncOutcome::Success,
            pushed: Vec::new(),
            failed: Vec::new(),
            fetched: 0,
            committed: 0,
            errors: Vec::new(),
        }
    }

    pub(crate) fn skipped(reason: &str) -> Self {
        Self {
            outcome: SyncOutcome::Skipped,
            errors: vec![SyncErrorEvent {
                phase: SyncPhase::Push,
                id: None,
                error: reason.to_string(),
                kind: SyncErrorKind::MissingConfiguration,
            }],
            ..Self::new()
        }
    }

    /// True unless the fetch failed. A partial failure still counts: no data
    /// was lost and the failed ids stay queued.
    pub fn is_ok(&self) -> bool {
        !matches!(self.outcome, SyncOutcome::Failure)
    }

    /// Push failure for `id`, if any.
    pub fn push_error(&self, id: &str) -> Option<&SyncErrorEvent> {
        self.errors
            .iter()
            .find(|e| e.phase == SyncPhase::Push && e.id.as_deref() == Some(id))
    }

    /// Human-readable summary for non-success outcomes.
    pub fn message(&self) -> Option<String> {
        match self.outcome {
            SyncOutcome::Success => None,
            SyncOutcome::PartialFailure => Some(format!(
                "{} record(s) could not be pushed and will be retried: {}",
                self.failed.len(),
                self.failed.join(", ")
            )),
            SyncOutcome::Failure | SyncOutcome::Skipped => Some(
                self.errors
                    .iter()
                    .find(|e| e.id.is_none())
                    .map(|e| e.error.clone())
                    .unwrap_or_else(|| "sync failed".to_string()),
            ),
        }
    }

    /// Top-level error for a failed cycle.
    pub(crate) fn to_error(&self) -> Option<EngineError> {
        if self.outcome != SyncOutcome::Failure {
            return None;
        }
        let fetch_error = self.errors.iter().find(|e| e.phase == SyncPhase::Fetch);
        let message = self.message().unwrap_or_default();
        Some(match fetch_error.map(|e| e.kind) {
            Some(SyncErrorKind::RemoteRejection) => EngineError::RemoteRejection {
                ids: Vec::new(),
                message,
            },
            _ => EngineError::Network(message),
        })
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// At least one cycle is in flight.
    Syncing,
}

// ============================================================================
// Engine options
// ============================================================================

/// Callback type for cycle error events.
pub type SyncErrorCallback = dyn Fn(&SyncErrorEvent) + Send + Sync;

/// Callback type for `Idle` ↔ `Syncing` transitions.
pub type SyncStateCallback = dyn Fn(SyncState) + Send + Sync;

/// Configuration for `SyncEngine`.
pub struct EngineOptions {
    /// Profile-scoped local persistence (also names the collection).
    pub store: Arc<ScopedStore>,
    /// `None` = remote not configured: sync is a no-op, `save` fails.
    pub remote: Option<Arc<dyn RemoteBackend>>,
    /// Active profile at startup, if already signed in.
    pub profile: Option<ProfileScope>,
    /// Column mapping (`None` = core fields + payload only)
    pub mapper: Option<RemoteMapper>,
    /// Normalization rules (`None` = `CanonicalIds`)
    pub normalizer: Option<Arc<dyn Normalizer>>,
    /// Serialize overlapping cycles instead of letting them interleave.
    pub single_flight: bool,
    /// Called for each cycle error
    pub on_error: Option<Arc<SyncErrorCallback>>,
    /// Called on `Idle` ↔ `Syncing` transitions
    pub on_state_change: Option<Arc<SyncStateCallback>>,
}

impl EngineOptions {
    pub fn new(store: Arc<ScopedStore>) -> Self {
        Self {
            store,
            remote: None,
            profile: None,
            mapper: None,
            normalizer: None,
            single_flight: false,
            on_error: None,
            on_state_change: None,
        }
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn profile(mut self, profile: ProfileScope) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn mapper(mut self, mapper: RemoteMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&SyncErrorEvent) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_state_change(mut self, callback: impl Fn(SyncState) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(callback));
        self
    }
}

/// Build the push error event for a failed upsert.
pub(crate) fn push_error(id: &str, err: &RemoteError) -> SyncErrorEvent {
    SyncErrorEvent {
        phase: SyncPhase::Push,
        id: Some(id.to_string()),
        error: err.message.clone(),
        kind: err.kind.into(),
    }
}
