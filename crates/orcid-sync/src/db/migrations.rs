//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`; each pending migration
//! runs once, in order.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_institutions_table",
        sql: include_str!("sql/001_create_institutions.sql"),
    },
    Migration {
        version: 2,
        description: "create_cache_entries_table",
        sql: include_str!("sql/002_create_cache_entries.sql"),
    },
    Migration {
        version: 3,
        description: "create_cache_runs_table",
        sql: include_str!("sql/003_create_cache_runs.sql"),
    },
    Migration {
        version: 4,
        description: "create_researcher_tables",
        sql: include_str!("sql/004_create_researchers.sql"),
    },
];

/// Applies every migration newer than the recorded schema version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        log::info!(
            "Applying migration v{}: {}",
            migration.version,
            migration.description
        );
        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
