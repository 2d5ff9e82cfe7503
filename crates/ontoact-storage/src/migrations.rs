//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use ontoact_core::error::OntoactError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), OntoactError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| OntoactError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| OntoactError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: action_executions");
    }

    Ok(())
}

/// Version 1: execution log table.
///
/// JSON-valued columns (`action_source`, `results`, `dynamic_params`,
/// `executor`, `action_type_snapshot`) hold serde_json text.
fn apply_v1(conn: &Connection) -> Result<(), OntoactError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS action_executions (
            id                   TEXT PRIMARY KEY NOT NULL,
            kn_id                TEXT NOT NULL,
            action_type_id       TEXT NOT NULL,
            action_type_name     TEXT NOT NULL DEFAULT '',
            action_source_type   TEXT NOT NULL
                                 CHECK (action_source_type IN ('tool', 'mcp')),
            action_source        TEXT NOT NULL,
            object_type_id       TEXT NOT NULL,
            trigger_type         TEXT NOT NULL DEFAULT 'manual',
            status               TEXT NOT NULL
                                 CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
            total_count          INTEGER NOT NULL,
            success_count        INTEGER NOT NULL DEFAULT 0,
            failed_count         INTEGER NOT NULL DEFAULT 0,
            results              TEXT NOT NULL DEFAULT '[]',
            dynamic_params       TEXT NOT NULL DEFAULT '{}',
            executor_id          TEXT NOT NULL DEFAULT '',
            executor             TEXT NOT NULL DEFAULT '{}',
            start_time           INTEGER NOT NULL,
            end_time             INTEGER,
            duration_ms          INTEGER,
            action_type_snapshot TEXT NOT NULL DEFAULT 'null'
        );

        CREATE INDEX IF NOT EXISTS idx_action_executions_kn
            ON action_executions (kn_id, start_time DESC);

        CREATE INDEX IF NOT EXISTS idx_action_executions_status
            ON action_executions (kn_id, status);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'action_executions');
        ",
    )
    .map_err(|e| OntoactError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
