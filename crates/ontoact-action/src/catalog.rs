//! Action-type catalog access.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use ontoact_core::action::ActionType;

use crate::error::SchedulerError;

/// An action type together with the raw configuration it was decoded from.
///
/// The raw snapshot is stored verbatim on each execution so later catalog
/// edits do not change what a past execution meant.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub action_type: ActionType,
    pub snapshot: Value,
}

/// Read access to action type definitions.
#[async_trait]
pub trait ActionTypeCatalog: Send + Sync {
    /// Fetch one action type. `Ok(None)` means it does not exist.
    async fn get(
        &self,
        kn_id: &str,
        branch: &str,
        action_type_id: &str,
    ) -> Result<Option<CatalogEntry>, SchedulerError>;
}

type CatalogKey = (String, String, String);

/// Catalog held in memory, keyed by `(kn_id, branch, action_type_id)`.
pub struct InMemoryCatalog {
    entries: Mutex<HashMap<CatalogKey, CatalogEntry>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register an action type; its snapshot is its own JSON form.
    pub fn insert(
        &self,
        kn_id: &str,
        branch: &str,
        action_type: ActionType,
    ) -> Result<(), SchedulerError> {
        let snapshot = serde_json::to_value(&action_type)
            .map_err(|e| SchedulerError::Internal(format!("Failed to snapshot action type: {}", e)))?;
        self.put(kn_id, branch, CatalogEntry { action_type, snapshot })
    }

    /// Register an action type from its raw JSON configuration.
    ///
    /// Configurations whose action source is neither `tool` nor `mcp` are
    /// rejected here.
    pub fn insert_raw(&self, kn_id: &str, branch: &str, raw: Value) -> Result<(), SchedulerError> {
        let action_type: ActionType = serde_json::from_value(raw.clone())
            .map_err(|e| SchedulerError::InvalidParameter(format!("Invalid action type: {}", e)))?;
        self.put(
            kn_id,
            branch,
            CatalogEntry {
                action_type,
                snapshot: raw,
            },
        )
    }

    fn put(&self, kn_id: &str, branch: &str, entry: CatalogEntry) -> Result<(), SchedulerError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| SchedulerError::Internal(format!("Lock poisoned: {}", e)))?;
        let key = (
            kn_id.to_string(),
            branch.to_string(),
            entry.action_type.id.clone(),
        );
        entries.insert(key, entry);
        Ok(())
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionTypeCatalog for InMemoryCatalog {
    async fn get(
        &self,
        kn_id: &str,
        branch: &str,
        action_type_id: &str,
    ) -> Result<Option<CatalogEntry>, SchedulerError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| SchedulerError::Internal(format!("Lock poisoned: {}", e)))?;
        let key = (
            kn_id.to_string(),
            branch.to_string(),
            action_type_id.to_string(),
        );
        Ok(entries.get(&key).cloned())
    }
}
