//! Pre-submission hooks.
//!
//! Both are optional. When installed they run after targets are resolved and
//! before the execution record is created, and can stop the submission.

use async_trait::async_trait;

use ontoact_core::action::ActionType;
use ontoact_core::types::AccountInfo;

use crate::error::SchedulerError;
use crate::types::ActionExecutionRequest;

/// Decides whether `executor` may run `action_type`.
#[async_trait]
pub trait PermissionCheck: Send + Sync {
    /// Return `SchedulerError::PermissionDenied` to refuse.
    async fn check(
        &self,
        executor: &AccountInfo,
        action_type: &ActionType,
    ) -> Result<(), SchedulerError>;
}

/// Detects repeated submissions of the same request.
#[async_trait]
pub trait DuplicateCheck: Send + Sync {
    /// `Ok(false)` rejects the request as a duplicate.
    async fn should_proceed(&self, request: &ActionExecutionRequest) -> Result<bool, SchedulerError>;
}
