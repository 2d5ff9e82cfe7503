//! Execution log store.
//!
//! The scheduler creates records, the batch executor is their only writer
//! while it runs, and `cancel_execution` is the one external status write.
//! Every store enforces the status state machine on writes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ontoact_core::error::OntoactError;
use ontoact_core::execution::{ActionExecution, ExecutionStatus, ExecutionUpdate};
use ontoact_core::state_machine::validate_transition;
use ontoact_storage::ExecutionRepository;

use crate::error::StoreError;

/// Durable storage for `ActionExecution` records.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    async fn create(&self, execution: &ActionExecution) -> Result<(), StoreError>;

    /// Apply a partial update. A status change that breaks the state
    /// machine rejects the whole update.
    async fn update(
        &self,
        kn_id: &str,
        execution_id: &str,
        update: &ExecutionUpdate,
    ) -> Result<(), StoreError>;

    /// Read a record back with at most `results_limit` results.
    async fn get(
        &self,
        kn_id: &str,
        execution_id: &str,
        results_limit: usize,
    ) -> Result<Option<ActionExecution>, StoreError>;

    /// Records of a namespace, newest first, without their results.
    async fn list(
        &self,
        kn_id: &str,
        status: Option<ExecutionStatus>,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory execution store.
pub struct InMemoryExecutionStore {
    executions: Mutex<Vec<ActionExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            executions: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ActionExecution>>, StoreError> {
        self.executions
            .lock()
            .map_err(|e| StoreError::Backend(OntoactError::Storage(format!("Lock poisoned: {}", e))))
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionLogStore for InMemoryExecutionStore {
    async fn create(&self, execution: &ActionExecution) -> Result<(), StoreError> {
        let mut executions = self.lock()?;
        if executions.iter().any(|e| e.id == execution.id) {
            return Err(StoreError::Backend(OntoactError::Storage(format!(
                "Execution already exists: {}",
                execution.id
            ))));
        }
        executions.push(execution.clone());
        Ok(())
    }

    async fn update(
        &self,
        kn_id: &str,
        execution_id: &str,
        update: &ExecutionUpdate,
    ) -> Result<(), StoreError> {
        let mut executions = self.lock()?;
        let execution = executions
            .iter_mut()
            .find(|e| e.kn_id == kn_id && e.id == execution_id)
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;

        if let Some(to) = update.status {
            validate_transition(execution.status, to)
                .map_err(|_| StoreError::InvalidTransition(execution.status, to))?;
        }
        update.apply_to(execution)?;
        Ok(())
    }

    async fn get(
        &self,
        kn_id: &str,
        execution_id: &str,
        results_limit: usize,
    ) -> Result<Option<ActionExecution>, StoreError> {
        let executions = self.lock()?;
        Ok(executions
            .iter()
            .find(|e| e.kn_id == kn_id && e.id == execution_id)
            .map(|e| {
                let mut found = e.clone();
                found.results.truncate(results_limit);
                found
            }))
    }

    async fn list(
        &self,
        kn_id: &str,
        status: Option<ExecutionStatus>,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError> {
        let executions = self.lock()?;
        let mut result: Vec<ActionExecution> = executions
            .iter()
            .filter(|e| e.kn_id == kn_id)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .map(|e| ActionExecution {
                results: Vec::new(),
                ..e.clone()
            })
            .collect();

        // Newest first
        result.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }
}

// =============================================================================
// SQLite store
// =============================================================================

/// Execution store backed by the SQLite `ExecutionRepository`.
///
/// Repository calls block on the connection mutex, so each one runs on the
/// blocking thread pool.
pub struct SqliteExecutionStore {
    repo: Arc<ExecutionRepository>,
}

impl SqliteExecutionStore {
    pub fn new(repo: Arc<ExecutionRepository>) -> Self {
        Self { repo }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&ExecutionRepository) -> Result<T, OntoactError> + Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || f(&repo))
            .await
            .map_err(|e| {
                StoreError::Backend(OntoactError::Storage(format!("Blocking task failed: {}", e)))
            })?
            .map_err(StoreError::from_storage)
    }
}

#[async_trait]
impl ExecutionLogStore for SqliteExecutionStore {
    async fn create(&self, execution: &ActionExecution) -> Result<(), StoreError> {
        let execution = execution.clone();
        self.run(move |repo| repo.create(&execution)).await
    }

    async fn update(
        &self,
        kn_id: &str,
        execution_id: &str,
        update: &ExecutionUpdate,
    ) -> Result<(), StoreError> {
        let kn_id = kn_id.to_string();
        let execution_id = execution_id.to_string();
        let update = update.clone();
        self.run(move |repo| repo.update(&kn_id, &execution_id, &update))
            .await
    }

    async fn get(
        &self,
        kn_id: &str,
        execution_id: &str,
        results_limit: usize,
    ) -> Result<Option<ActionExecution>, StoreError> {
        let kn_id = kn_id.to_string();
        let execution_id = execution_id.to_string();
        self.run(move |repo| repo.find(&kn_id, &execution_id, results_limit))
            .await
    }

    async fn list(
        &self,
        kn_id: &str,
        status: Option<ExecutionStatus>,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError> {
        let kn_id = kn_id.to_string();
        self.run(move |repo| repo.list(&kn_id, status, limit)).await
    }
}
