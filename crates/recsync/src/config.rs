//! Host-facing settings, loadable from JSON.
//!
//! ```json
//! {
//!   "collection": "customers",
//!   "interval_ms": 30000,
//!   "debounce_ms": 500,
//!   "single_flight": false,
//!   "columns": [{ "field": "name", "column": "name" }]
//! }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::mapper::{ColumnMapping, RemoteMapper};
use crate::remote::RemoteBackend;
use crate::storage::{LocalStore, ScopedStore};
use crate::sync::{EngineOptions, SchedulerOptions};
use crate::types::ProfileScope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Collection name; scopes local keys and names the remote table.
    pub collection: String,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub single_flight: bool,
    /// Fields with a dedicated remote column.
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,
}

impl SyncSettings {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            interval_ms: None,
            debounce_ms: None,
            single_flight: false,
            columns: Vec::new(),
        }
    }

    /// Parse and validate settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(EngineError::MissingConfiguration(
                "collection name is empty".to_string(),
            ));
        }
        if self.interval_ms == Some(0) {
            return Err(EngineError::MissingConfiguration(
                "interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn mapper(&self) -> RemoteMapper {
        RemoteMapper::new(
            self.columns
                .iter()
                .map(|m| (m.field.clone(), m.column.clone())),
        )
    }

    /// Engine options over `primary` (and `fallback`, when given). A missing
    /// remote or profile leaves the engine unconfigured rather than failing.
    pub fn engine_options(
        &self,
        primary: Arc<dyn LocalStore>,
        fallback: Option<Arc<dyn LocalStore>>,
        remote: Option<Arc<dyn RemoteBackend>>,
        profile: Option<ProfileScope>,
    ) -> Result<EngineOptions> {
        self.validate()?;

        let mut store = ScopedStore::new(primary, self.collection.trim());
        if let Some(fallback) = fallback {
            store = store.with_fallback(fallback);
        }

        let mut options = EngineOptions::new(Arc::new(store))
            .mapper(self.mapper())
            .single_flight(self.single_flight);
        options.remote = remote;
        options.profile = profile.filter(|p| !p.is_empty());
        Ok(options)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            interval_ms: self.interval_ms,
            debounce_ms: self.debounce_ms,
        }
    }
}
