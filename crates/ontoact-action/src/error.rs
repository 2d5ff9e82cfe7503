//! Error types for the action scheduler.

use ontoact_core::error::OntoactError;
use ontoact_core::execution::ExecutionStatus;

/// Errors surfaced synchronously by the scheduler's public operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Action type not found: {0}")]
    ActionTypeNotFound(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Duplicate execution detected")]
    DuplicateExecution,
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Execution store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from translating and delegating one object's backend call.
///
/// Never returned to the caller of `execute_action`; the worker records the
/// message on the object's result instead.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Backend call failed: {0}")]
    Backend(String),
    #[error("Unsupported action source: {0}")]
    UnsupportedSource(String),
}

/// Errors from the execution log store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Execution not found: {0}")]
    NotFound(String),
    #[error("Invalid status transition: {0} -> {1}")]
    InvalidTransition(ExecutionStatus, ExecutionStatus),
    #[error("Storage backend error: {0}")]
    Backend(#[from] OntoactError),
}

impl StoreError {
    /// Map a storage-layer error, recovering typed transitions and misses.
    pub fn from_storage(err: OntoactError) -> Self {
        match err {
            OntoactError::NotFound(id) => StoreError::NotFound(id),
            OntoactError::InvalidTransition { from, to } => {
                match (from.parse::<ExecutionStatus>(), to.parse::<ExecutionStatus>()) {
                    (Ok(f), Ok(t)) => StoreError::InvalidTransition(f, t),
                    _ => StoreError::Backend(OntoactError::InvalidTransition { from, to }),
                }
            }
            other => StoreError::Backend(other),
        }
    }
}

/// Errors from binding an action's parameters against one object.
///
/// The binder skips malformed declarations instead of failing, so nothing
/// currently constructs this; the executor still records it per object.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("parameter at position {0} has no name")]
    UnnamedParameter(usize),
}
