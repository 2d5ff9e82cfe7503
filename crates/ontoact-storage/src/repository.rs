//! SQLite-backed execution log.
//!
//! `ExecutionRepository` persists `ActionExecution` records, applies partial
//! updates under the status state machine, and reads records back with a
//! bounded result list.

use std::sync::Arc;

use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension};

use ontoact_core::error::OntoactError;
use ontoact_core::execution::{ActionExecution, ExecutionStatus, ExecutionUpdate};
use ontoact_core::state_machine::validate_transition;
use ontoact_core::types::Timestamp;

use crate::db::Database;

const SELECT_COLUMNS: &str = "id, kn_id, action_type_id, action_type_name, action_source_type,
     action_source, object_type_id, trigger_type, status, total_count, success_count,
     failed_count, results, dynamic_params, executor, start_time, end_time, duration_ms,
     action_type_snapshot";

/// Repository for action execution records.
pub struct ExecutionRepository {
    db: Arc<Database>,
}

impl ExecutionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new execution record.
    pub fn create(&self, execution: &ActionExecution) -> Result<(), OntoactError> {
        let action_source = serde_json::to_string(&execution.action_source)?;
        let results = serde_json::to_string(&execution.results)?;
        let dynamic_params = serde_json::to_string(&execution.dynamic_params)?;
        let executor = serde_json::to_string(&execution.executor)?;
        let snapshot = serde_json::to_string(&execution.action_type_snapshot)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO action_executions
                    (id, kn_id, action_type_id, action_type_name, action_source_type,
                     action_source, object_type_id, trigger_type, status, total_count,
                     success_count, failed_count, results, dynamic_params, executor_id,
                     executor, start_time, end_time, duration_ms, action_type_snapshot)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                rusqlite::params![
                    execution.id,
                    execution.kn_id,
                    execution.action_type_id,
                    execution.action_type_name,
                    execution.action_source_type.to_string(),
                    action_source,
                    execution.object_type_id,
                    execution.trigger_type,
                    execution.status.to_string(),
                    execution.total_count as i64,
                    execution.success_count as i64,
                    execution.failed_count as i64,
                    results,
                    dynamic_params,
                    execution.executor.id,
                    executor,
                    execution.start_time.0,
                    execution.end_time.map(|t| t.0),
                    execution.duration_ms,
                    snapshot,
                ],
            )
            .map_err(|e| OntoactError::Storage(format!("Failed to save execution: {}", e)))?;
            Ok(())
        })
    }

    /// Apply a partial update to an execution.
    ///
    /// The status transition is checked against the stored status; an
    /// invalid transition rejects the whole update.
    pub fn update(
        &self,
        kn_id: &str,
        execution_id: &str,
        update: &ExecutionUpdate,
    ) -> Result<(), OntoactError> {
        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = update.status {
            assignments.push("status = ?");
            values.push(Box::new(status.to_string()));
        }
        if let Some(n) = update.success_count {
            assignments.push("success_count = ?");
            values.push(Box::new(n as i64));
        }
        if let Some(n) = update.failed_count {
            assignments.push("failed_count = ?");
            values.push(Box::new(n as i64));
        }
        if let Some(results) = &update.results {
            assignments.push("results = ?");
            values.push(Box::new(serde_json::to_string(results)?));
        }
        if let Some(end) = update.end_time {
            assignments.push("end_time = ?");
            values.push(Box::new(end.0));
        }
        if let Some(d) = update.duration_ms {
            assignments.push("duration_ms = ?");
            values.push(Box::new(d));
        }

        self.db.with_conn(|conn| {
            let current = current_status(conn, kn_id, execution_id)?;
            if let Some(status) = update.status {
                validate_transition(current, status)?;
            }
            if assignments.is_empty() {
                return Ok(());
            }

            let sql = format!(
                "UPDATE action_executions SET {} WHERE kn_id = ? AND id = ?",
                assignments.join(", ")
            );
            values.push(Box::new(kn_id.to_string()));
            values.push(Box::new(execution_id.to_string()));
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

            conn.execute(&sql, params.as_slice())
                .map_err(|e| OntoactError::Storage(format!("Failed to update execution: {}", e)))?;
            Ok(())
        })
    }

    /// Find an execution, keeping at most `results_limit` results.
    pub fn find(
        &self,
        kn_id: &str,
        execution_id: &str,
        results_limit: usize,
    ) -> Result<Option<ActionExecution>, OntoactError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM action_executions WHERE kn_id = ?1 AND id = ?2",
                SELECT_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| OntoactError::Storage(e.to_string()))?;

            let row = stmt
                .query_row(rusqlite::params![kn_id, execution_id], |row| {
                    Ok(row_to_execution(row, results_limit))
                })
                .optional()
                .map_err(|e| OntoactError::Storage(e.to_string()))?;

            row.transpose()
        })
    }

    /// List executions of a namespace, newest first, without results.
    pub fn list(
        &self,
        kn_id: &str,
        status: Option<ExecutionStatus>,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, OntoactError> {
        self.db.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {} FROM action_executions WHERE kn_id = ?",
                SELECT_COLUMNS
            );
            let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(kn_id.to_string())];
            if let Some(status) = status {
                sql.push_str(" AND status = ?");
                values.push(Box::new(status.to_string()));
            }
            sql.push_str(" ORDER BY start_time DESC, id DESC LIMIT ?");
            values.push(Box::new(limit as i64));
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| OntoactError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params.as_slice(), |row| Ok(row_to_execution(row, 0)))
                .map_err(|e| OntoactError::Storage(e.to_string()))?;

            let mut executions = Vec::new();
            for row in rows {
                let execution = row.map_err(|e| OntoactError::Storage(e.to_string()))??;
                executions.push(execution);
            }
            Ok(executions)
        })
    }
}

fn current_status(
    conn: &Connection,
    kn_id: &str,
    execution_id: &str,
) -> Result<ExecutionStatus, OntoactError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM action_executions WHERE kn_id = ?1 AND id = ?2",
            rusqlite::params![kn_id, execution_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| OntoactError::Storage(e.to_string()))?;

    let raw = raw.ok_or_else(|| OntoactError::NotFound(execution_id.to_string()))?;
    raw.parse::<ExecutionStatus>().map_err(OntoactError::Storage)
}

fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> Result<T, OntoactError> {
    row.get(idx).map_err(|e| OntoactError::Storage(e.to_string()))
}

fn row_to_execution(
    row: &rusqlite::Row<'_>,
    results_limit: usize,
) -> Result<ActionExecution, OntoactError> {
    let source_type: String = get(row, 4)?;
    let action_source: String = get(row, 5)?;
    let status: String = get(row, 8)?;
    let total_count: i64 = get(row, 9)?;
    let success_count: i64 = get(row, 10)?;
    let failed_count: i64 = get(row, 11)?;
    let results: String = get(row, 12)?;
    let dynamic_params: String = get(row, 13)?;
    let executor: String = get(row, 14)?;
    let end_time: Option<i64> = get(row, 16)?;
    let snapshot: String = get(row, 18)?;

    let mut results: Vec<ontoact_core::ObjectExecutionResult> = if results_limit == 0 {
        Vec::new()
    } else {
        serde_json::from_str(&results)?
    };
    results.truncate(results_limit);

    Ok(ActionExecution {
        id: get(row, 0)?,
        kn_id: get(row, 1)?,
        action_type_id: get(row, 2)?,
        action_type_name: get(row, 3)?,
        action_source_type: source_type.parse().map_err(OntoactError::Storage)?,
        action_source: serde_json::from_str(&action_source)?,
        object_type_id: get(row, 6)?,
        trigger_type: get(row, 7)?,
        status: status.parse().map_err(OntoactError::Storage)?,
        total_count: total_count as usize,
        success_count: success_count as usize,
        failed_count: failed_count as usize,
        results,
        dynamic_params: serde_json::from_str(&dynamic_params)?,
        executor: serde_json::from_str(&executor)?,
        start_time: Timestamp(get(row, 15)?),
        end_time: end_time.map(Timestamp),
        duration_ms: get(row, 17)?,
        action_type_snapshot: serde_json::from_str(&snapshot)?,
    })
}
