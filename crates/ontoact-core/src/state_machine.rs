//! Execution status state machine with validated transitions.
//!
//! Status only moves forward:
//! Pending -> Running -> Completed/Failed/Cancelled
//! Pending -> Cancelled (cancelled before the worker started)

use crate::error::{OntoactError, Result};
use crate::execution::ExecutionStatus;

/// Validate that a status transition is allowed.
///
/// Valid transitions:
/// - Pending -> Running
/// - Pending -> Cancelled
/// - Running -> Completed
/// - Running -> Failed
/// - Running -> Cancelled
/// - Cancelled -> Cancelled (the worker confirming an external cancel)
pub fn validate_transition(from: ExecutionStatus, to: ExecutionStatus) -> Result<()> {
    let valid = matches!(
        (from, to),
        (ExecutionStatus::Pending, ExecutionStatus::Running)
            | (ExecutionStatus::Pending, ExecutionStatus::Cancelled)
            | (ExecutionStatus::Running, ExecutionStatus::Completed)
            | (ExecutionStatus::Running, ExecutionStatus::Failed)
            | (ExecutionStatus::Running, ExecutionStatus::Cancelled)
            | (ExecutionStatus::Cancelled, ExecutionStatus::Cancelled)
    );

    if valid {
        Ok(())
    } else {
        Err(OntoactError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
