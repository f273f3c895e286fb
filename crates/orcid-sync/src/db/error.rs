//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt {column} value '{value}'")]
    Corrupt { column: &'static str, value: String },

    #[error("Cache run not found: {0}")]
    RunNotFound(String),

    /// Another run of the same (institution, kind) is still `running`.
    #[error("A {kind} run for {ror_id} is already running")]
    RunConflict { ror_id: String, kind: String },

    /// The run was finalized, possibly by stale-run recovery elsewhere.
    #[error("Cache run {run_id} is no longer running (status {status})")]
    RunFinished { run_id: String, status: String },

    #[error("Database lock poisoned")]
    LockPoisoned,
}
