//! Remote Mapper: translation between the local `Record` shape and the
//! remote wire shape.
//!
//! The wire shape carries typed columns for fields with a stable remote
//! column, plus a `data` extension payload holding the entire local record
//! tagged with the acting profile. Fields the remote has no column for yet
//! still round-trip through `data`.
//!
//! Only a missing key or JSON `null` counts as "absent". `0`, `false` and
//! `""` in a column are real values and win over the payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::types::{ProfileScope, Record};

/// Payload key naming the profile that performed the write.
pub const ACTOR_KEY: &str = "updated_by";

/// Keys owned by the wire envelope; never used as column names.
const RESERVED: &[&str] = &["id", "profile_id", "created_at", "data", ACTOR_KEY];

// ============================================================================
// Wire types
// ============================================================================

/// A record as stored by the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub id: String,
    #[serde(default)]
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Typed columns (and any extra columns the backend adds).
    #[serde(flatten)]
    pub columns: Map<String, Value>,
    /// Extension payload: the full local record plus the actor tag.
    #[serde(default)]
    pub data: Value,
}

/// Maps one local field to its dedicated remote column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub field: String,
    pub column: String,
}

// ============================================================================
// RemoteMapper
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RemoteMapper {
    columns: Vec<ColumnMapping>,
}

impl RemoteMapper {
    /// Build a mapper from `(field, column)` pairs. Pairs naming a reserved
    /// envelope key are dropped.
    pub fn new<I, F, C>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (F, C)>,
        F: Into<String>,
        C: Into<String>,
    {
        let columns = pairs
            .into_iter()
            .map(|(field, column)| ColumnMapping {
                field: field.into(),
                column: column.into(),
            })
            .filter(|m| {
                let reserved = RESERVED.contains(&m.column.as_str())
                    || RESERVED.contains(&m.field.as_str());
                if reserved {
                    tracing::warn!(
                        field = %m.field,
                        column = %m.column,
                        "ignoring reserved column mapping"
                    );
                }
                !reserved
            })
            .collect();
        Self { columns }
    }

    /// Mapper whose column names equal the local field names.
    pub fn same_names(fields: &[&str]) -> Self {
        Self::new(fields.iter().map(|f| (*f, *f)))
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    /// Local → wire. Fields missing from the record are omitted from the
    /// columns rather than sent as `null`.
    pub fn to_remote(&self, record: &Record, actor: &ProfileScope) -> WireRecord {
        let mut columns = Map::new();
        for mapping in &self.columns {
            if let Some(value) = record.fields.get(&mapping.field) {
                columns.insert(mapping.column.clone(), value.clone());
            }
        }

        let mut data = record.to_value();
        if let Value::Object(ref mut obj) = data {
            obj.insert(
                ACTOR_KEY.to_string(),
                Value::String(actor.as_str().to_string()),
            );
        }

        let profile_id = if record.profile_id.is_empty() {
            actor.as_str().to_string()
        } else {
            record.profile_id.clone()
        };

        WireRecord {
            id: record.id.clone(),
            profile_id,
            created_at: (!record.created_at.is_empty()).then(|| record.created_at.clone()),
            columns,
            data,
        }
    }

    /// Wire → local. Each mapped field takes the column value when present,
    /// else the payload value.
    pub fn from_remote(&self, wire: &WireRecord) -> Result<Record> {
        if wire.id.trim().is_empty() {
            return Err(EngineError::Decode("remote record has an empty id".to_string()));
        }

        let payload = match &wire.data {
            Value::Object(obj) => obj.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(EngineError::Decode(format!(
                    "record \"{}\": extension payload must be an object, got {}",
                    wire.id,
                    json_type(other)
                )))
            }
        };

        let mut fields = Map::new();
        let mut profile_id = String::new();
        let mut created_at = String::new();
        for (key, value) in payload {
            match key.as_str() {
                "id" | ACTOR_KEY => {}
                "profile_id" => profile_id = value.as_str().unwrap_or_default().to_string(),
                "created_at" => created_at = value.as_str().unwrap_or_default().to_string(),
                _ => {
                    fields.insert(key, value);
                }
            }
        }

        for mapping in &self.columns {
            match wire.columns.get(&mapping.column) {
                None | Some(Value::Null) => {}
                Some(value) => {
                    fields.insert(mapping.field.clone(), value.clone());
                }
            }
        }

        if !wire.profile_id.is_empty() {
            profile_id = wire.profile_id.clone();
        }
        if let Some(ts) = wire.created_at.as_ref().filter(|ts| !ts.is_empty()) {
            created_at = ts.clone();
        }

        Ok(Record {
            id: wire.id.clone(),
            profile_id,
            created_at,
            fields,
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
