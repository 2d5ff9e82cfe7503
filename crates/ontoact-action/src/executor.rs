//! Async batch executor.
//!
//! Runs one execution to completion in the background: binds and dispatches
//! every target object in order, snapshots progress and polls for
//! cancellation every `batch_size` objects, then writes the terminal
//! update. Nothing here returns an error to the submitter; object failures
//! are recorded as results and store failures are logged.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use ontoact_core::action::ActionType;
use ontoact_core::execution::{
    ActionExecution, ExecutionStatus, ExecutionUpdate, ObjectExecutionResult, ObjectStatus,
};
use ontoact_core::types::{ObjectRow, ObjectSystemInfo, Timestamp};

use crate::binder::build_execution_params;
use crate::dispatch::{Dispatcher, ExecutionContext};
use crate::error::StoreError;
use crate::store::ExecutionLogStore;

/// One resolved object: its identity and its full row for binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionTarget {
    pub info: ObjectSystemInfo,
    pub row: ObjectRow,
}

impl ExecutionTarget {
    pub fn from_row(row: ObjectRow) -> Self {
        Self {
            info: ObjectSystemInfo::from_row(&row),
            row,
        }
    }
}

/// Everything the worker needs, captured at submission time.
#[derive(Debug, Clone)]
pub struct ExecutionJob {
    pub execution: ActionExecution,
    pub action_type: ActionType,
    pub targets: Vec<ExecutionTarget>,
}

/// Background worker shared by every execution of a scheduler.
pub struct BatchExecutor {
    store: Arc<dyn ExecutionLogStore>,
    dispatcher: Arc<Dispatcher>,
    batch_size: usize,
}

impl BatchExecutor {
    pub fn new(
        store: Arc<dyn ExecutionLogStore>,
        dispatcher: Arc<Dispatcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            batch_size: batch_size.max(1),
        }
    }

    /// Run a job and return the terminal status it ended in.
    pub async fn run(&self, job: ExecutionJob) -> ExecutionStatus {
        let ExecutionJob {
            execution,
            action_type,
            targets,
        } = job;
        let kn_id = execution.kn_id.as_str();
        let execution_id = execution.id.as_str();
        let total = targets.len();
        let ctx = ExecutionContext::from_executor(&execution.executor);

        info!(execution_id = %execution_id, total, "Starting async execution");

        // A record cancelled while still pending refuses the running write.
        let mut running = false;
        let mut cancelled_at = match self.mark_running(kn_id, execution_id).await {
            Ok(()) => {
                running = true;
                None
            }
            Err(StoreError::InvalidTransition(ExecutionStatus::Cancelled, _)) => {
                info!(execution_id = %execution_id, "Execution cancelled before it started");
                Some(0)
            }
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Failed to update execution status to running");
                None
            }
        };

        let mut success_count = 0usize;
        let mut failed_count = 0usize;
        let mut results: Vec<ObjectExecutionResult> = Vec::with_capacity(total);

        if cancelled_at.is_none() {
            for (i, target) in targets.iter().enumerate() {
                if i > 0 && i % self.batch_size == 0 {
                    if self.is_cancelled(kn_id, execution_id).await {
                        info!(execution_id = %execution_id, processed = i, total, "Execution cancelled, stopping");
                        cancelled_at = Some(i);
                        break;
                    }
                    self.write_progress(kn_id, execution_id, success_count, failed_count, &results)
                        .await;
                    debug!(execution_id = %execution_id, processed = i, total, "Execution progress");
                }

                let result = self
                    .execute_one(&ctx, &action_type, &execution.dynamic_params, target)
                    .await;
                match result.status {
                    ObjectStatus::Success => success_count += 1,
                    _ => failed_count += 1,
                }
                results.push(result);
            }
        }

        let mut cancelled_count = 0usize;
        if let Some(from) = cancelled_at {
            for target in &targets[from..] {
                results.push(ObjectExecutionResult::cancelled(target.info.clone()));
                cancelled_count += 1;
            }
        }

        let final_status = if cancelled_at.is_some() {
            ExecutionStatus::Cancelled
        } else if failed_count == total {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };

        let end = Timestamp::now();
        let update = ExecutionUpdate {
            status: Some(final_status),
            success_count: Some(success_count),
            failed_count: Some(failed_count),
            results: Some(results),
            end_time: Some(end),
            duration_ms: Some(end.millis_since(execution.start_time)),
        };

        // The terminal status is only reachable from running.
        if !running && cancelled_at.is_none() {
            if let Err(e) = self.mark_running(kn_id, execution_id).await {
                warn!(execution_id = %execution_id, error = %e, "Retry of running status failed");
            }
        }
        let persisted = self
            .write_terminal(kn_id, execution_id, &update, final_status)
            .await;

        info!(
            execution_id = %execution_id,
            status = %persisted,
            success = success_count,
            failed = failed_count,
            cancelled = cancelled_count,
            "Completed async execution"
        );
        persisted
    }

    async fn mark_running(&self, kn_id: &str, execution_id: &str) -> Result<(), StoreError> {
        self.store
            .update(kn_id, execution_id, &ExecutionUpdate::status(ExecutionStatus::Running))
            .await
    }

    /// Write the terminal update and return the status the record ends in.
    async fn write_terminal(
        &self,
        kn_id: &str,
        execution_id: &str,
        update: &ExecutionUpdate,
        final_status: ExecutionStatus,
    ) -> ExecutionStatus {
        match self.store.update(kn_id, execution_id, update).await {
            Ok(()) => final_status,
            Err(StoreError::InvalidTransition(ExecutionStatus::Cancelled, _)) => {
                // Cancelled after the last poll: keep the cancel, record the work.
                info!(execution_id = %execution_id, "Execution was cancelled during its last batch");
                if let Err(e) = self
                    .store
                    .update(kn_id, execution_id, &update.clone().without_status())
                    .await
                {
                    error!(execution_id = %execution_id, error = %e, "Failed to update execution record");
                }
                ExecutionStatus::Cancelled
            }
            Err(StoreError::InvalidTransition(ExecutionStatus::Pending, _)) => {
                let retried = match self.mark_running(kn_id, execution_id).await {
                    Ok(()) => self.store.update(kn_id, execution_id, update).await,
                    Err(e) => Err(e),
                };
                match retried {
                    Ok(()) => final_status,
                    Err(e) => {
                        error!(execution_id = %execution_id, error = %e, "Failed to update execution record");
                        self.stored_status(kn_id, execution_id).await.unwrap_or(final_status)
                    }
                }
            }
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "Failed to update execution record");
                self.stored_status(kn_id, execution_id).await.unwrap_or(final_status)
            }
        }
    }

    /// Status currently on record, if it can be read.
    async fn stored_status(&self, kn_id: &str, execution_id: &str) -> Option<ExecutionStatus> {
        match self.store.get(kn_id, execution_id, 0).await {
            Ok(current) => current.map(|c| c.status),
            Err(_) => None,
        }
    }

    async fn execute_one(
        &self,
        ctx: &ExecutionContext,
        action_type: &ActionType,
        dynamic_params: &Map<String, Value>,
        target: &ExecutionTarget,
    ) -> ObjectExecutionResult {
        let start = Timestamp::now();

        let params = match build_execution_params(action_type, &target.row, dynamic_params) {
            Ok(params) => params,
            Err(e) => {
                return ObjectExecutionResult::failed(
                    target.info.clone(),
                    Map::new(),
                    format!("Failed to build parameters: {}", e),
                    start,
                    Timestamp::now(),
                );
            }
        };

        match self.dispatcher.dispatch(ctx, action_type, params.clone()).await {
            Ok(value) => ObjectExecutionResult::success(
                target.info.clone(),
                params,
                value,
                start,
                Timestamp::now(),
            ),
            Err(e) => {
                debug!(instance_id = %target.info.instance_id, error = %e, "Object dispatch failed");
                ObjectExecutionResult::failed(
                    target.info.clone(),
                    params,
                    e.to_string(),
                    start,
                    Timestamp::now(),
                )
            }
        }
    }

    /// Read the status back without results. Unreadable means not cancelled.
    async fn is_cancelled(&self, kn_id: &str, execution_id: &str) -> bool {
        match self.store.get(kn_id, execution_id, 0).await {
            Ok(Some(current)) => current.status == ExecutionStatus::Cancelled,
            Ok(None) => {
                warn!(execution_id = %execution_id, "Execution record missing during cancellation check");
                false
            }
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Failed to check execution status");
                false
            }
        }
    }

    async fn write_progress(
        &self,
        kn_id: &str,
        execution_id: &str,
        success_count: usize,
        failed_count: usize,
        results: &[ObjectExecutionResult],
    ) {
        let update = ExecutionUpdate::progress(success_count, failed_count, results.to_vec());
        if let Err(e) = self.store.update(kn_id, execution_id, &update).await {
            warn!(execution_id = %execution_id, error = %e, "Failed to update execution progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ToolBoxClient;
    use crate::dispatch::ToolRequest;
    use crate::error::DispatchError;
    use crate::store::InMemoryExecutionStore;
    use async_trait::async_trait;
    use ontoact_core::action::{ActionSource, Parameter, ValueFrom};
    use ontoact_core::execution::TRIGGER_TYPE_MANUAL;
    use ontoact_core::types::AccountInfo;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every object whose `ip` parameter is missing.
    struct PickyTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolBoxClient for PickyTool {
        async fn invoke(
            &self,
            _ctx: &ExecutionContext,
            _box_id: &str,
            _tool_id: &str,
            request: &ToolRequest,
        ) -> Result<Value, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.body.get("ip") {
                Some(ip) => Ok(json!({"restarted": ip})),
                None => Err(DispatchError::Backend("HTTP 400: ip required".to_string())),
            }
        }
    }

    fn action_type(parameters: Vec<Parameter>) -> ActionType {
        ActionType {
            id: "at_001".to_string(),
            name: "Restart".to_string(),
            condition: None,
            object_type_id: "pod".to_string(),
            parameters,
            action_source: ActionSource::Tool {
                box_id: "b1".to_string(),
                tool_id: "t1".to_string(),
            },
        }
    }

    fn ip_param() -> Parameter {
        Parameter {
            name: "ip".to_string(),
            value_from: ValueFrom::Prop,
            value: json!("pod_ip"),
            source: Some("body".to_string()),
        }
    }

    fn target(id: &str, ip: Option<&str>) -> ExecutionTarget {
        let mut row = Map::new();
        row.insert("_instance_id".to_string(), json!(id));
        row.insert("_display".to_string(), json!(format!("pod {}", id)));
        if let Some(ip) = ip {
            row.insert("pod_ip".to_string(), json!(ip));
        }
        ExecutionTarget::from_row(row)
    }

    fn record(id: &str, total: usize) -> ActionExecution {
        ActionExecution {
            id: id.to_string(),
            kn_id: "kn".to_string(),
            action_type_id: "at_001".to_string(),
            action_type_name: "Restart".to_string(),
            action_source_type: ontoact_core::action::ActionSourceType::Tool,
            action_source: ActionSource::Tool {
                box_id: "b1".to_string(),
                tool_id: "t1".to_string(),
            },
            object_type_id: "pod".to_string(),
            trigger_type: TRIGGER_TYPE_MANUAL.to_string(),
            status: ExecutionStatus::Pending,
            total_count: total,
            success_count: 0,
            failed_count: 0,
            results: Vec::new(),
            dynamic_params: Map::new(),
            executor: AccountInfo::new("u-1", "user"),
            start_time: Timestamp::now(),
            end_time: None,
            duration_ms: None,
            action_type_snapshot: Value::Null,
        }
    }

    fn executor(store: Arc<InMemoryExecutionStore>, tool: Arc<PickyTool>) -> BatchExecutor {
        let dispatcher = Dispatcher::new().with_tool_client(tool);
        BatchExecutor::new(store, Arc::new(dispatcher), 2)
    }

    #[test]
    fn test_target_from_row() {
        let t = target("p1", Some("10.0.0.1"));
        assert_eq!(t.info.instance_id, "p1");
        assert_eq!(t.info.display, "pod p1");
        assert_eq!(t.row["pod_ip"], json!("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_partial_failure_completes() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let tool = Arc::new(PickyTool {
            calls: AtomicUsize::new(0),
        });
        let exec = record("e1", 3);
        store.create(&exec).await.unwrap();

        let job = ExecutionJob {
            execution: exec,
            action_type: action_type(vec![ip_param()]),
            targets: vec![
                target("a", Some("10.0.0.1")),
                target("b", None),
                target("c", Some("10.0.0.3")),
            ],
        };
        let status = executor(Arc::clone(&store), Arc::clone(&tool)).run(job).await;
        assert_eq!(status, ExecutionStatus::Completed);

        let saved = store.get("kn", "e1", 100).await.unwrap().unwrap();
        assert_eq!(saved.status, ExecutionStatus::Completed);
        assert_eq!(saved.success_count, 2);
        assert_eq!(saved.failed_count, 1);
        assert_eq!(saved.results.len(), 3);
        assert!(saved.end_time.is_some());
        assert!(saved.duration_ms.is_some());

        let failed = &saved.results[1];
        assert_eq!(failed.object.instance_id, "b");
        assert!(failed.result.is_none());
        assert!(failed.error_message.as_deref().unwrap().contains("ip required"));
        assert_eq!(saved.results[0].parameters["ip"], json!("10.0.0.1"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_all_failed_is_failed() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let tool = Arc::new(PickyTool {
            calls: AtomicUsize::new(0),
        });
        let exec = record("e2", 2);
        store.create(&exec).await.unwrap();

        let job = ExecutionJob {
            execution: exec,
            action_type: action_type(vec![ip_param()]),
            targets: vec![target("a", None), target("b", None)],
        };
        let status = executor(Arc::clone(&store), tool).run(job).await;
        assert_eq!(status, ExecutionStatus::Failed);
        let saved = store.get("kn", "e2", 100).await.unwrap().unwrap();
        assert_eq!(saved.failed_count, 2);
    }

    #[tokio::test]
    async fn test_unnamed_parameter_does_not_fail_objects() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let tool = Arc::new(PickyTool {
            calls: AtomicUsize::new(0),
        });
        let exec = record("e3", 2);
        store.create(&exec).await.unwrap();

        let unnamed = Parameter {
            name: String::new(),
            value_from: ValueFrom::Const,
            value: json!(1),
            source: None,
        };
        let job = ExecutionJob {
            execution: exec,
            action_type: action_type(vec![unnamed, ip_param()]),
            targets: vec![target("a", Some("10.0.0.1")), target("b", Some("10.0.0.2"))],
        };
        let status = executor(Arc::clone(&store), Arc::clone(&tool)).run(job).await;
        assert_eq!(status, ExecutionStatus::Completed);

        let saved = store.get("kn", "e3", 100).await.unwrap().unwrap();
        assert_eq!(saved.success_count, 2);
        assert_eq!(saved.results[0].parameters.len(), 1);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_while_pending_skips_everything() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let tool = Arc::new(PickyTool {
            calls: AtomicUsize::new(0),
        });
        let exec = record("e4", 3);
        store.create(&exec).await.unwrap();
        store
            .update("kn", "e4", &ExecutionUpdate::status(ExecutionStatus::Cancelled))
            .await
            .unwrap();

        let job = ExecutionJob {
            execution: exec,
            action_type: action_type(vec![ip_param()]),
            targets: vec![
                target("a", Some("1")),
                target("b", Some("2")),
                target("c", Some("3")),
            ],
        };
        let status = executor(Arc::clone(&store), Arc::clone(&tool)).run(job).await;
        assert_eq!(status, ExecutionStatus::Cancelled);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);

        let saved = store.get("kn", "e4", 100).await.unwrap().unwrap();
        assert_eq!(saved.status, ExecutionStatus::Cancelled);
        assert_eq!(saved.results.len(), 3);
        assert!(saved
            .results
            .iter()
            .all(|r| r.status == ObjectStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_record_still_drains_objects() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let tool = Arc::new(PickyTool {
            calls: AtomicUsize::new(0),
        });
        // Never created: every write fails and is only logged.
        let job = ExecutionJob {
            execution: record("ghost", 5),
            action_type: action_type(vec![ip_param()]),
            targets: (0..5).map(|i| target(&i.to_string(), Some("ip"))).collect(),
        };
        let status = executor(store, Arc::clone(&tool)).run(job).await;
        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 5);
    }

    /// Fails the first `failures` updates, then delegates.
    struct StumblingStore {
        inner: InMemoryExecutionStore,
        failures: AtomicUsize,
    }

    impl StumblingStore {
        fn failing_first(n: usize) -> Self {
            Self {
                inner: InMemoryExecutionStore::new(),
                failures: AtomicUsize::new(n),
            }
        }
    }

    #[async_trait]
    impl ExecutionLogStore for StumblingStore {
        async fn create(&self, execution: &ActionExecution) -> Result<(), StoreError> {
            self.inner.create(execution).await
        }

        async fn update(
            &self,
            kn_id: &str,
            execution_id: &str,
            update: &ExecutionUpdate,
        ) -> Result<(), StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Backend(ontoact_core::OntoactError::Storage(
                    "database is locked".to_string(),
                )));
            }
            self.inner.update(kn_id, execution_id, update).await
        }

        async fn get(
            &self,
            kn_id: &str,
            execution_id: &str,
            results_limit: usize,
        ) -> Result<Option<ActionExecution>, StoreError> {
            self.inner.get(kn_id, execution_id, results_limit).await
        }

        async fn list(
            &self,
            kn_id: &str,
            status: Option<ExecutionStatus>,
            limit: usize,
        ) -> Result<Vec<ActionExecution>, StoreError> {
            self.inner.list(kn_id, status, limit).await
        }
    }

    async fn run_on_stumbling_store(failures: usize) -> (ExecutionStatus, ActionExecution) {
        let store = Arc::new(StumblingStore::failing_first(failures));
        let tool = Arc::new(PickyTool {
            calls: AtomicUsize::new(0),
        });
        let exec = record("e5", 2);
        store.create(&exec).await.unwrap();

        let dispatcher = Dispatcher::new().with_tool_client(tool);
        let executor = BatchExecutor::new(store.clone(), Arc::new(dispatcher), 2);
        let job = ExecutionJob {
            execution: exec,
            action_type: action_type(vec![ip_param()]),
            targets: vec![target("a", Some("10.0.0.1")), target("b", Some("10.0.0.2"))],
        };
        let status = executor.run(job).await;
        let saved = store.get("kn", "e5", 100).await.unwrap().unwrap();
        (status, saved)
    }

    #[tokio::test]
    async fn test_failed_running_write_is_retried_before_terminal() {
        let (status, saved) = run_on_stumbling_store(1).await;
        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(saved.status, ExecutionStatus::Completed);
        assert_eq!(saved.success_count, 2);
        assert_eq!(saved.results.len(), 2);
        assert!(saved.end_time.is_some());
    }

    #[tokio::test]
    async fn test_terminal_write_recovers_from_pending_record() {
        // Both running writes fail; the terminal write finds the record pending.
        let (status, saved) = run_on_stumbling_store(2).await;
        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(saved.status, ExecutionStatus::Completed);
        assert_eq!(saved.results.len(), 2);
    }

    #[tokio::test]
    async fn test_lost_terminal_write_reports_stored_status() {
        // Every write of the run fails, so the record stays pending.
        let (status, saved) = run_on_stumbling_store(10).await;
        assert_eq!(saved.status, ExecutionStatus::Pending);
        assert_eq!(status, ExecutionStatus::Pending);
        assert!(saved.results.is_empty());
    }
}
