//! Request and response shapes of the action scheduler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ontoact_core::execution::{ExecutionStatus, TRIGGER_TYPE_MANUAL};
use ontoact_core::types::{AccountInfo, Timestamp};

/// Message returned once an execution has been recorded and launched.
pub const EXECUTION_STARTED_MESSAGE: &str = "Action execution started";

/// A request to apply an action type to a set of objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionExecutionRequest {
    pub kn_id: String,
    #[serde(default)]
    pub branch: String,
    pub action_type_id: String,
    /// Identities of the objects to target. Empty means scan mode.
    #[serde(rename = "_instance_identities", default)]
    pub instance_identities: Vec<Map<String, Value>>,
    /// Caller-supplied values for `input` parameters.
    #[serde(default)]
    pub dynamic_params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    /// The caller. Resolved by the transport layer, never deserialized.
    #[serde(skip)]
    pub executor: AccountInfo,
}

impl ActionExecutionRequest {
    pub fn is_scan_mode(&self) -> bool {
        self.instance_identities.is_empty()
    }

    /// The trigger type, defaulting to `manual` when absent or blank.
    pub fn trigger_type(&self) -> String {
        match self.trigger_type.as_deref() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => TRIGGER_TYPE_MANUAL.to_string(),
        }
    }
}

/// Immediate reply to `execute_action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecutionResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub message: String,
    pub created_at: Timestamp,
}
