//! Durable execution records and their per-object results.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::{ActionSource, ActionSourceType};
use crate::error::Result;
use crate::state_machine::validate_transition;
use crate::types::{AccountInfo, ObjectSystemInfo, Timestamp};

/// Trigger recorded when the caller does not name one.
pub const TRIGGER_TYPE_MANUAL: &str = "manual";

/// Error message stamped on objects skipped by a cancellation.
pub const CANCELLED_MESSAGE: &str = "execution cancelled";

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Returns `true` once no further work will be done.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            _ => Err(format!("Unknown execution status: {}", s)),
        }
    }
}

/// Outcome for one target object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectStatus::Success => write!(f, "success"),
            ObjectStatus::Failed => write!(f, "failed"),
            ObjectStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// The result of running the action against one object.
///
/// Exactly one of `result` and `error_message` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectExecutionResult {
    #[serde(flatten)]
    pub object: ObjectSystemInfo,
    pub status: ObjectStatus,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl ObjectExecutionResult {
    pub fn success(
        object: ObjectSystemInfo,
        parameters: Map<String, Value>,
        result: Value,
        start: Timestamp,
        end: Timestamp,
    ) -> Self {
        Self {
            object,
            status: ObjectStatus::Success,
            parameters,
            result: Some(result),
            error_message: None,
            start_time: Some(start),
            end_time: Some(end),
            duration_ms: Some(end.millis_since(start)),
        }
    }

    pub fn failed(
        object: ObjectSystemInfo,
        parameters: Map<String, Value>,
        error_message: String,
        start: Timestamp,
        end: Timestamp,
    ) -> Self {
        Self {
            object,
            status: ObjectStatus::Failed,
            parameters,
            result: None,
            error_message: Some(error_message),
            start_time: Some(start),
            end_time: Some(end),
            duration_ms: Some(end.millis_since(start)),
        }
    }

    /// An object that was never started because the execution was cancelled.
    pub fn cancelled(object: ObjectSystemInfo) -> Self {
        Self {
            object,
            status: ObjectStatus::Cancelled,
            parameters: Map::new(),
            result: None,
            error_message: Some(CANCELLED_MESSAGE.to_string()),
            start_time: None,
            end_time: None,
            duration_ms: None,
        }
    }
}

/// One durable run of an action type against a resolved set of objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: String,
    pub kn_id: String,
    pub action_type_id: String,
    pub action_type_name: String,
    pub action_source_type: ActionSourceType,
    pub action_source: ActionSource,
    pub object_type_id: String,
    pub trigger_type: String,
    pub status: ExecutionStatus,
    pub total_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    #[serde(default)]
    pub results: Vec<ObjectExecutionResult>,
    #[serde(default)]
    pub dynamic_params: Map<String, Value>,
    #[serde(default)]
    pub executor: AccountInfo,
    pub start_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// The catalog's action-type configuration as it was at submission.
    #[serde(default)]
    pub action_type_snapshot: Value,
}

/// A partial write against an execution record.
///
/// `total_count` and the submission snapshot are deliberately absent: they
/// are fixed when the record is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub success_count: Option<usize>,
    pub failed_count: Option<usize>,
    pub results: Option<Vec<ObjectExecutionResult>>,
    pub end_time: Option<Timestamp>,
    pub duration_ms: Option<i64>,
}

impl ExecutionUpdate {
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(
        success_count: usize,
        failed_count: usize,
        results: Vec<ObjectExecutionResult>,
    ) -> Self {
        Self {
            success_count: Some(success_count),
            failed_count: Some(failed_count),
            results: Some(results),
            ..Self::default()
        }
    }

    /// Drop the status change, keeping every other field.
    pub fn without_status(mut self) -> Self {
        self.status = None;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to an in-memory record.
    ///
    /// The status transition is validated first; on error the record is
    /// left untouched.
    pub fn apply_to(&self, execution: &mut ActionExecution) -> Result<()> {
        if let Some(status) = self.status {
            validate_transition(execution.status, status)?;
        }
        if let Some(status) = self.status {
            execution.status = status;
        }
        if let Some(n) = self.success_count {
            execution.success_count = n;
        }
        if let Some(n) = self.failed_count {
            execution.failed_count = n;
        }
        if let Some(results) = &self.results {
            execution.results = results.clone();
        }
        if let Some(end) = self.end_time {
            execution.end_time = Some(end);
        }
        if let Some(d) = self.duration_ms {
            execution.duration_ms = Some(d);
        }
        Ok(())
    }
}
