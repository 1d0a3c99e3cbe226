//! Remote backend collaborator: the network side of the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::RemoteError;
use crate::mapper::WireRecord;
use crate::types::{now_rfc3339, ProfileScope, RecordId};

// ============================================================================
// RemoteBackend
// ============================================================================

/// User-implemented backend for a shared record collection.
///
/// Implementations handle transport and auth (HTTP, WebSocket, a hosted
/// database SDK, ...). Every failure is returned as a `RemoteError` value.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Insert-or-update `record` keyed by its id. Must be idempotent.
    async fn upsert(&self, collection: &str, record: &WireRecord) -> Result<(), RemoteError>;

    /// Read every record of `collection` owned by `profile`.
    async fn fetch_all(
        &self,
        collection: &str,
        profile: &ProfileScope,
    ) -> Result<Vec<WireRecord>, RemoteError>;

    /// Delete a record by id. Deleting an unknown id succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Change notifications for `collection`, if the backend offers them.
    fn subscribe(&self, _collection: &str) -> Option<broadcast::Receiver<RemoteChange>> {
        None
    }

    /// Append an entry to the audit log. Callers do not act on the outcome.
    async fn append_audit(&self, _entry: &AuditEntry) -> Result<(), RemoteError> {
        Ok(())
    }
}

// ============================================================================
// Notifications and audit entries
// ============================================================================

/// "Something in this collection changed."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub collection: String,
    /// The changed record, when the backend reports it.
    pub id: Option<RecordId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Save,
    Delete,
}

/// Fire-and-forget audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub profile: ProfileScope,
    pub collection: String,
    pub action: AuditAction,
    pub record_ids: Vec<RecordId>,
    pub at: String,
}

impl AuditEntry {
    pub fn new(
        profile: &ProfileScope,
        collection: &str,
        action: AuditAction,
        record_ids: Vec<RecordId>,
    ) -> Self {
        Self {
            profile: profile.clone(),
            collection: collection.to_string(),
            action,
            record_ids,
            at: now_rfc3339(),
        }
    }
}
