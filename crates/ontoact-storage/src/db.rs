//! SQLite handle for the execution log.
//!
//! File databases run in WAL mode so status polls can read while a worker
//! writes its progress snapshot.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use ontoact_core::error::OntoactError;

use crate::migrations;

const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;";

/// One serialized connection shared by every repository call.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the execution log at `path`, creating parent directories and
    /// applying pending migrations.
    pub fn new(path: &Path) -> Result<Self, OntoactError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            OntoactError::Storage(format!("Cannot open {}: {}", path.display(), e))
        })?;
        conn.execute_batch(FILE_PRAGMAS)
            .map_err(|e| OntoactError::Storage(format!("Cannot configure journal: {}", e)))?;

        let db = Self::from_connection(conn)?;
        info!(path = %path.display(), "Execution log opened");
        Ok(db)
    }

    /// Private in-memory execution log.
    pub fn in_memory() -> Result<Self, OntoactError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OntoactError::Storage(format!("Cannot open in-memory log: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, OntoactError> {
        migrations::run_migrations(&conn)?;
        debug!("Execution log schema is current");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` while holding the connection.
    ///
    /// Nothing else touches the connection until `f` returns, so a
    /// read-then-write inside one closure cannot interleave with another
    /// caller's.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, OntoactError>
    where
        F: FnOnce(&Connection) -> Result<T, OntoactError>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| OntoactError::Storage("execution log connection poisoned".to_string()))?;
        f(&guard)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Database(..)")
    }
}
