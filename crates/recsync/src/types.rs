use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Record identifier. Assigned at creation, never reused.
pub type RecordId = String;

/// Prefix shared by every storage key the engine writes.
const KEY_PREFIX: &str = "recsync";

/// Generate a fresh record id (UUID v4).
pub fn generate_id() -> RecordId {
    uuid::Uuid::new_v4().to_string()
}

/// Current time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// ProfileScope
// ============================================================================

/// Namespace derived from the active user/profile. Keys local storage and
/// tags remote writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileScope(String);

impl ProfileScope {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Storage key of the committed record collection for this profile
    /// within `collection`.
    pub fn records_key(&self, collection: &str) -> String {
        format!("{KEY_PREFIX}:{}:{collection}:records", self.0)
    }

    /// Storage key of the dirty-id set for this profile within `collection`.
    pub fn dirty_key(&self, collection: &str) -> String {
        format!("{KEY_PREFIX}:{}:{collection}:dirty", self.0)
    }
}

impl fmt::Display for ProfileScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileScope {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// Record
// ============================================================================

/// A business record as held in the local snapshot.
///
/// Dirtiness is not a field: it is membership in the dirty set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Owning profile scope (empty until normalized).
    #[serde(default)]
    pub profile_id: String,
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub created_at: String,
    /// Mutable business fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a new record with a fresh id and creation timestamp.
    pub fn new(profile: &ProfileScope, fields: Map<String, Value>) -> Self {
        Self {
            id: generate_id(),
            profile_id: profile.as_str().to_string(),
            created_at: now_rfc3339(),
            fields,
        }
    }

    /// Build a record with an explicit id (loading, tests, remote decode).
    pub fn with_id(id: impl Into<RecordId>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            profile_id: String::new(),
            created_at: String::new(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Full JSON form of the record (core fields plus business fields).
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("id".to_string(), Value::String(self.id.clone()));
        obj.insert(
            "profile_id".to_string(),
            Value::String(self.profile_id.clone()),
        );
        obj.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        Value::Object(obj)
    }
}
