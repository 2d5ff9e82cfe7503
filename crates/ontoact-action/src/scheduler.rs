//! Action scheduler.
//!
//! Validates a submission, resolves its target objects, records the
//! execution and launches a detached `BatchExecutor` run. Submissions return
//! as soon as the record exists; object-level work is only visible by
//! polling `get_execution`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use ontoact_core::config::{ExecutionConfig, ENV_MAX_EXECUTION_OBJECTS};
use ontoact_core::execution::{ActionExecution, ExecutionStatus, ExecutionUpdate};
use ontoact_core::types::Timestamp;

use crate::catalog::ActionTypeCatalog;
use crate::dispatch::{validate_source, Dispatcher};
use crate::error::{SchedulerError, StoreError};
use crate::executor::{BatchExecutor, ExecutionJob, ExecutionTarget};
use crate::hooks::{DuplicateCheck, PermissionCheck};
use crate::selector::{build_instance_identities_condition, effective_condition, ObjectSelector};
use crate::store::ExecutionLogStore;
use crate::types::{ActionExecutionRequest, ActionExecutionResponse, EXECUTION_STARTED_MESSAGE};

/// Orchestrates action executions.
pub struct ActionScheduler {
    catalog: Arc<dyn ActionTypeCatalog>,
    selector: Arc<dyn ObjectSelector>,
    store: Arc<dyn ExecutionLogStore>,
    executor: Arc<BatchExecutor>,
    config: ExecutionConfig,
    permission_check: Option<Arc<dyn PermissionCheck>>,
    duplicate_check: Option<Arc<dyn DuplicateCheck>>,
    workers: Mutex<HashMap<String, JoinHandle<ExecutionStatus>>>,
    accepting: AtomicBool,
}

impl ActionScheduler {
    pub fn new(
        catalog: Arc<dyn ActionTypeCatalog>,
        selector: Arc<dyn ObjectSelector>,
        store: Arc<dyn ExecutionLogStore>,
        dispatcher: Arc<Dispatcher>,
        config: ExecutionConfig,
    ) -> Self {
        let executor = Arc::new(BatchExecutor::new(
            Arc::clone(&store),
            dispatcher,
            config.batch_size,
        ));
        Self {
            catalog,
            selector,
            store,
            executor,
            config,
            permission_check: None,
            duplicate_check: None,
            workers: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn with_permission_check(mut self, hook: Arc<dyn PermissionCheck>) -> Self {
        self.permission_check = Some(hook);
        self
    }

    pub fn with_duplicate_check(mut self, hook: Arc<dyn DuplicateCheck>) -> Self {
        self.duplicate_check = Some(hook);
        self
    }

    /// Submit an execution.
    ///
    /// Every validation failure is returned here, before any record is
    /// created. On success the worker is already running.
    pub async fn execute_action(
        &self,
        request: ActionExecutionRequest,
    ) -> Result<ActionExecutionResponse, SchedulerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::Internal(
                "Scheduler is shutting down".to_string(),
            ));
        }

        let entry = self
            .catalog
            .get(&request.kn_id, &request.branch, &request.action_type_id)
            .await?
            .ok_or_else(|| SchedulerError::ActionTypeNotFound(request.action_type_id.clone()))?;
        let action_type = entry.action_type;

        validate_source(&action_type.action_source)
            .map_err(|e| SchedulerError::InvalidParameter(e.to_string()))?;

        if request.is_scan_mode() {
            info!(action_type_id = %action_type.id, "No instance identities provided, scanning all matching instances");
        } else {
            info!(
                action_type_id = %action_type.id,
                identities = request.instance_identities.len(),
                "Resolving targeted instances"
            );
        }
        if !request.is_scan_mode()
            && build_instance_identities_condition(&request.instance_identities).is_none()
        {
            return Err(SchedulerError::InvalidParameter(
                "instance identities carry no keys".to_string(),
            ));
        }
        let condition =
            effective_condition(action_type.condition.as_ref(), &request.instance_identities);

        let rows = self
            .selector
            .resolve(
                &request.kn_id,
                &request.branch,
                &action_type.object_type_id,
                condition.as_ref(),
            )
            .await?;

        if rows.is_empty() {
            info!(action_type_id = %action_type.id, "No matching instances found");
            return Err(SchedulerError::InvalidParameter(
                "No matching instances found for the action type condition".to_string(),
            ));
        }
        info!(action_type_id = %action_type.id, count = rows.len(), "Resolved matching instances");

        let limit = self.config.max_execution_objects;
        if rows.len() > limit {
            warn!(count = rows.len(), limit, "Execution objects count exceeds limit");
            return Err(SchedulerError::InvalidParameter(format!(
                "Number of objects ({}) exceeds the maximum limit ({}). Please reduce the scope or adjust the {} environment variable.",
                rows.len(),
                limit,
                ENV_MAX_EXECUTION_OBJECTS
            )));
        }

        let executor = request.executor.clone();

        if let Some(hook) = &self.permission_check {
            hook.check(&executor, &action_type).await?;
        }
        if let Some(hook) = &self.duplicate_check {
            if !hook.should_proceed(&request).await? {
                return Err(SchedulerError::DuplicateExecution);
            }
        }

        let targets: Vec<ExecutionTarget> = rows.into_iter().map(ExecutionTarget::from_row).collect();
        let now = Timestamp::now();
        let trigger_type = request.trigger_type();

        let execution = ActionExecution {
            id: Uuid::new_v4().to_string(),
            kn_id: request.kn_id,
            action_type_id: action_type.id.clone(),
            action_type_name: action_type.name.clone(),
            action_source_type: action_type.action_source.source_type(),
            action_source: action_type.action_source.clone(),
            object_type_id: action_type.object_type_id.clone(),
            trigger_type,
            status: ExecutionStatus::Pending,
            total_count: targets.len(),
            success_count: 0,
            failed_count: 0,
            results: Vec::new(),
            dynamic_params: request.dynamic_params,
            executor,
            start_time: now,
            end_time: None,
            duration_ms: None,
            action_type_snapshot: entry.snapshot,
        };

        self.store.create(&execution).await?;

        let execution_id = execution.id.clone();
        let job = ExecutionJob {
            execution,
            action_type,
            targets,
        };
        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.run(job).await });
        self.track(&execution_id, handle)?;

        Ok(ActionExecutionResponse {
            execution_id,
            status: ExecutionStatus::Pending,
            message: EXECUTION_STARTED_MESSAGE.to_string(),
            created_at: now,
        })
    }

    /// Read an execution with up to `results_limit` results.
    pub async fn get_execution(
        &self,
        kn_id: &str,
        execution_id: &str,
    ) -> Result<ActionExecution, SchedulerError> {
        self.store
            .get(kn_id, execution_id, self.config.results_limit)
            .await?
            .ok_or_else(|| SchedulerError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Request cancellation of a pending or running execution.
    ///
    /// The worker notices at its next batch boundary; objects already
    /// dispatched still finish.
    pub async fn cancel_execution(
        &self,
        kn_id: &str,
        execution_id: &str,
    ) -> Result<(), SchedulerError> {
        let current = self
            .store
            .get(kn_id, execution_id, 0)
            .await?
            .ok_or_else(|| SchedulerError::ExecutionNotFound(execution_id.to_string()))?;

        if current.status.is_terminal() {
            return Err(SchedulerError::InvalidParameter(format!(
                "Execution {} is already {}",
                execution_id, current.status
            )));
        }

        match self
            .store
            .update(kn_id, execution_id, &ExecutionUpdate::status(ExecutionStatus::Cancelled))
            .await
        {
            Ok(()) => {
                info!(execution_id = %execution_id, "Execution cancellation requested");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                Err(SchedulerError::ExecutionNotFound(execution_id.to_string()))
            }
            Err(StoreError::InvalidTransition(from, _)) => Err(SchedulerError::InvalidParameter(
                format!("Execution {} is already {}", execution_id, from),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Executions of a namespace, newest first, without results.
    pub async fn list_executions(
        &self,
        kn_id: &str,
        status: Option<ExecutionStatus>,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, SchedulerError> {
        Ok(self.store.list(kn_id, status, limit).await?)
    }

    /// Wait for a launched worker to finish.
    ///
    /// Returns `None` if no worker is tracked under this id (never launched
    /// here, or already awaited).
    pub async fn wait_for(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionStatus>, SchedulerError> {
        let handle = self.lock_workers()?.remove(execution_id);
        match handle {
            Some(handle) => handle
                .await
                .map(Some)
                .map_err(|e| SchedulerError::Internal(format!("Execution worker failed: {}", e))),
            None => Ok(None),
        }
    }

    /// Stop accepting submissions and wait for every running worker.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        let handles: Vec<(String, JoinHandle<ExecutionStatus>)> = match self.lock_workers() {
            Ok(mut workers) => workers.drain().collect(),
            Err(e) => {
                warn!(error = %e, "Cannot drain execution workers");
                return;
            }
        };

        info!(workers = handles.len(), "Waiting for execution workers");
        for (execution_id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(execution_id = %execution_id, error = %e, "Execution worker failed");
            }
        }
    }

    /// Number of launched workers not yet awaited.
    pub fn tracked_workers(&self) -> usize {
        self.lock_workers().map(|w| w.len()).unwrap_or(0)
    }

    fn track(
        &self,
        execution_id: &str,
        handle: JoinHandle<ExecutionStatus>,
    ) -> Result<(), SchedulerError> {
        let mut workers = self.lock_workers()?;
        workers.retain(|_, h| !h.is_finished());
        workers.insert(execution_id.to_string(), handle);
        Ok(())
    }

    fn lock_workers(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, JoinHandle<ExecutionStatus>>>, SchedulerError>
    {
        self.workers
            .lock()
            .map_err(|e| SchedulerError::Internal(format!("Lock poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::client::McpProxyClient;
    use crate::dispatch::{ExecutionContext, McpRequest};
    use crate::error::DispatchError;
    use crate::store::InMemoryExecutionStore;
    use async_trait::async_trait;
    use ontoact_core::action::{ActionSource, ActionType};
    use ontoact_core::types::{AccountInfo, Condition, ObjectRow};
    use serde_json::{json, Map, Value};

    struct FixedSelector {
        rows: Vec<ObjectRow>,
        seen: Mutex<Vec<Option<Condition>>>,
    }

    impl FixedSelector {
        fn with(n: usize) -> Self {
            let rows = (0..n)
                .map(|i| {
                    let mut row = Map::new();
                    row.insert("_instance_id".to_string(), json!(format!("obj-{}", i)));
                    row
                })
                .collect();
            Self {
                rows,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ObjectSelector for FixedSelector {
        async fn resolve(
            &self,
            _kn_id: &str,
            _branch: &str,
            _object_type_id: &str,
            condition: Option<&Condition>,
        ) -> Result<Vec<ObjectRow>, SchedulerError> {
            self.seen.lock().unwrap().push(condition.cloned());
            Ok(self.rows.clone())
        }
    }

    struct EchoMcp;

    #[async_trait]
    impl McpProxyClient for EchoMcp {
        async fn invoke(
            &self,
            ctx: &ExecutionContext,
            _mcp_id: &str,
            request: &McpRequest,
        ) -> Result<Value, DispatchError> {
            Ok(json!({"tool": request.tool_name, "user": ctx.account.id}))
        }
    }

    struct DenyAll;

    #[async_trait]
    impl PermissionCheck for DenyAll {
        async fn check(
            &self,
            executor: &AccountInfo,
            _action_type: &ActionType,
        ) -> Result<(), SchedulerError> {
            Err(SchedulerError::PermissionDenied(executor.id.clone()))
        }
    }

    struct AlwaysDuplicate;

    #[async_trait]
    impl DuplicateCheck for AlwaysDuplicate {
        async fn should_proceed(
            &self,
            _request: &ActionExecutionRequest,
        ) -> Result<bool, SchedulerError> {
            Ok(false)
        }
    }

    fn mcp_action(mcp_id: &str) -> ActionType {
        ActionType {
            id: "at_001".to_string(),
            name: "Restart".to_string(),
            condition: Some(Condition::eq("status", json!("Running"))),
            object_type_id: "pod".to_string(),
            parameters: Vec::new(),
            action_source: ActionSource::Mcp {
                mcp_id: mcp_id.to_string(),
                tool_name: "restart".to_string(),
                tool_id: String::new(),
            },
        }
    }

    fn scheduler_with(
        action: ActionType,
        objects: usize,
        config: ExecutionConfig,
    ) -> (ActionScheduler, Arc<InMemoryExecutionStore>, Arc<FixedSelector>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert("kn", "main", action).unwrap();
        let selector = Arc::new(FixedSelector::with(objects));
        let store = Arc::new(InMemoryExecutionStore::new());
        let dispatcher = Arc::new(Dispatcher::new().with_mcp_client(Arc::new(EchoMcp)));
        let scheduler = ActionScheduler::new(
            catalog,
            selector.clone(),
            store.clone(),
            dispatcher,
            config,
        );
        (scheduler, store, selector)
    }

    fn request() -> ActionExecutionRequest {
        ActionExecutionRequest {
            kn_id: "kn".to_string(),
            branch: "main".to_string(),
            action_type_id: "at_001".to_string(),
            executor: AccountInfo::new("u-7", "user"),
            ..ActionExecutionRequest::default()
        }
    }

    #[tokio::test]
    async fn test_execute_and_wait() {
        let (scheduler, _, _) = scheduler_with(mcp_action("m1"), 3, ExecutionConfig::default());
        let resp = scheduler.execute_action(request()).await.unwrap();
        assert_eq!(resp.status, ExecutionStatus::Pending);
        assert_eq!(resp.message, "Action execution started");

        let status = scheduler.wait_for(&resp.execution_id).await.unwrap();
        assert_eq!(status, Some(ExecutionStatus::Completed));
        assert_eq!(scheduler.wait_for(&resp.execution_id).await.unwrap(), None);

        let exec = scheduler
            .get_execution("kn", &resp.execution_id)
            .await
            .unwrap();
        assert_eq!(exec.total_count, 3);
        assert_eq!(exec.success_count, 3);
        assert_eq!(exec.trigger_type, "manual");
        assert_eq!(exec.executor.id, "u-7");
        assert_eq!(exec.results[0].result, Some(json!({"tool": "restart", "user": "u-7"})));
        assert_eq!(exec.action_type_snapshot["id"], json!("at_001"));
    }

    #[tokio::test]
    async fn test_unknown_action_type() {
        let (scheduler, _, _) = scheduler_with(mcp_action("m1"), 3, ExecutionConfig::default());
        let req = ActionExecutionRequest {
            action_type_id: "missing".to_string(),
            ..request()
        };
        let err = scheduler.execute_action(req).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ActionTypeNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_no_objects_is_invalid() {
        let (scheduler, store, _) = scheduler_with(mcp_action("m1"), 0, ExecutionConfig::default());
        let err = scheduler.execute_action(request()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParameter(_)));
        assert!(store.list("kn", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_mcp_id_rejected_before_record() {
        let (scheduler, store, selector) =
            scheduler_with(mcp_action(""), 3, ExecutionConfig::default());
        let err = scheduler.execute_action(request()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParameter(msg) if msg.contains("mcp_id")));
        assert!(store.list("kn", None, 10).await.unwrap().is_empty());
        assert!(selector.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyless_identities_rejected_not_scanned() {
        let (scheduler, store, selector) =
            scheduler_with(mcp_action("m1"), 3, ExecutionConfig::default());
        let targeted = ActionExecutionRequest {
            instance_identities: vec![Map::new(), Map::new()],
            ..request()
        };
        let err = scheduler.execute_action(targeted).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParameter(msg) if msg.contains("no keys")));
        assert!(store.list("kn", None, 10).await.unwrap().is_empty());
        assert!(selector.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permission_hook_blocks() {
        let (scheduler, store, _) = scheduler_with(mcp_action("m1"), 2, ExecutionConfig::default());
        let scheduler = scheduler.with_permission_check(Arc::new(DenyAll));
        let err = scheduler.execute_action(request()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::PermissionDenied(id) if id == "u-7"));
        assert!(store.list("kn", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_hook_blocks() {
        let (scheduler, _, _) = scheduler_with(mcp_action("m1"), 2, ExecutionConfig::default());
        let scheduler = scheduler.with_duplicate_check(Arc::new(AlwaysDuplicate));
        let err = scheduler.execute_action(request()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateExecution));
    }

    #[tokio::test]
    async fn test_get_unknown_execution() {
        let (scheduler, _, _) = scheduler_with(mcp_action("m1"), 1, ExecutionConfig::default());
        let err = scheduler.get_execution("kn", "nope").await.unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_terminal_execution_rejected() {
        let (scheduler, _, _) = scheduler_with(mcp_action("m1"), 1, ExecutionConfig::default());
        let resp = scheduler.execute_action(request()).await.unwrap();
        scheduler.wait_for(&resp.execution_id).await.unwrap();

        let err = scheduler
            .cancel_execution("kn", &resp.execution_id)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParameter(_)));

        let err = scheduler.cancel_execution("kn", "nope").await.unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn test_shutdown_waits_and_rejects_new_work() {
        let (scheduler, store, _) = scheduler_with(mcp_action("m1"), 5, ExecutionConfig::default());
        let resp = scheduler.execute_action(request()).await.unwrap();
        scheduler.shutdown().await;
        assert_eq!(scheduler.tracked_workers(), 0);

        let exec = store.get("kn", &resp.execution_id, 100).await.unwrap().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);

        let err = scheduler.execute_action(request()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Internal(_)));
    }

    #[tokio::test]
    async fn test_list_executions_newest_first() {
        let (scheduler, _, _) = scheduler_with(mcp_action("m1"), 1, ExecutionConfig::default());
        let first = scheduler.execute_action(request()).await.unwrap();
        scheduler.wait_for(&first.execution_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = scheduler.execute_action(request()).await.unwrap();
        scheduler.wait_for(&second.execution_id).await.unwrap();

        let listed = scheduler.list_executions("kn", None, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.execution_id);
        assert!(listed.iter().all(|e| e.results.is_empty()));

        let failed = scheduler
            .list_executions("kn", Some(ExecutionStatus::Failed), 10)
            .await
            .unwrap();
        assert!(failed.is_empty());
    }
}
