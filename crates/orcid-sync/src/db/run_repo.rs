//! Cache run repository for the `cache_runs` table.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};

use crate::model::{CacheRun, RecordKind, RunCounts, RunError, RunStatus, RunUpdate};

use super::{Database, DatabaseError};

const COLUMNS: &str = "id, ror_id, kind, status, started_at, finished_at, heartbeat_ms, fetched, \
                       created, updated, deleted, errors, error_summary, failure_reason";

struct RunRow {
    id: String,
    ror_id: String,
    kind: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    heartbeat_ms: i64,
    counts: [i64; 5],
    error_summary: String,
    failure_reason: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            ror_id: row.get("ror_id")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            heartbeat_ms: row.get("heartbeat_ms")?,
            counts: [
                row.get("fetched")?,
                row.get("created")?,
                row.get("updated")?,
                row.get("deleted")?,
                row.get("errors")?,
            ],
            error_summary: row.get("error_summary")?,
            failure_reason: row.get("failure_reason")?,
        })
    }

    fn into_run(self) -> Result<CacheRun, DatabaseError> {
        let kind = self.kind.parse::<RecordKind>().map_err(|_| DatabaseError::Corrupt {
            column: "kind",
            value: self.kind.clone(),
        })?;
        let status = self.status.parse::<RunStatus>().map_err(|_| DatabaseError::Corrupt {
            column: "status",
            value: self.status.clone(),
        })?;
        let errors: Vec<RunError> =
            serde_json::from_str(&self.error_summary).map_err(|_| DatabaseError::Corrupt {
                column: "error_summary",
                value: self.error_summary.clone(),
            })?;
        let heartbeat_at = Utc
            .timestamp_millis_opt(self.heartbeat_ms)
            .single()
            .ok_or_else(|| DatabaseError::Corrupt {
                column: "heartbeat_ms",
                value: self.heartbeat_ms.to_string(),
            })?;
        let [fetched, created, updated, deleted, error_count] = self.counts.map(|c| c.max(0) as u64);

        Ok(CacheRun {
            id: self.id,
            ror_id: self.ror_id,
            kind,
            status,
            started_at: parse_timestamp("started_at", &self.started_at)?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(|ts| parse_timestamp("finished_at", ts))
                .transpose()?,
            heartbeat_at,
            counts: RunCounts {
                fetched,
                created,
                updated,
                deleted,
                errors: error_count,
            },
            errors,
            failure_reason: self.failure_reason,
        })
    }
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::Corrupt {
            column,
            value: value.to_string(),
        })
}

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Inserts a `running` run and returns its generated id.
///
/// This is the storage half of the run slot: it fails with `RunConflict`
/// while any run of the same (institution, kind) is still `running`, even one
/// owned by another process.
pub fn create(
    db: &Database,
    ror_id: &str,
    kind: RecordKind,
    started_at: DateTime<Utc>,
) -> Result<String, DatabaseError> {
    let id = uuid::Uuid::new_v4().to_string();
    let inserted = db.with_conn(|conn| {
        let result = conn.execute(
            "INSERT INTO cache_runs (id, ror_id, kind, status, started_at, heartbeat_ms)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6
             WHERE NOT EXISTS (
                 SELECT 1 FROM cache_runs WHERE ror_id = ?2 AND kind = ?3 AND status = ?4
             )",
            params![
                id,
                ror_id,
                kind.as_str(),
                RunStatus::Running.as_str(),
                started_at.to_rfc3339(),
                started_at.timestamp_millis()
            ],
        );
        match result {
            Ok(changed) => Ok(changed > 0),
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    })?;

    if !inserted {
        return Err(DatabaseError::RunConflict {
            ror_id: ror_id.to_string(),
            kind: kind.as_str().to_string(),
        });
    }
    Ok(id)
}

/// Writes counters, status and heartbeat of a run that is still `running`.
///
/// A run that was already finalized is left untouched and reported as
/// `RunFinished`.
pub fn update(db: &Database, run_id: &str, update: &RunUpdate) -> Result<(), DatabaseError> {
    let error_summary = serde_json::to_string(&update.errors).map_err(|e| DatabaseError::Corrupt {
        column: "error_summary",
        value: e.to_string(),
    })?;
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE cache_runs SET status = ?2, finished_at = ?3, heartbeat_ms = ?4, fetched = ?5,
             created = ?6, updated = ?7, deleted = ?8, errors = ?9, error_summary = ?10,
             failure_reason = ?11
             WHERE id = ?1 AND status = ?12",
            params![
                run_id,
                update.status.as_str(),
                update.finished_at.map(|t| t.to_rfc3339()),
                update.heartbeat_at.timestamp_millis(),
                to_sql_count(update.counts.fetched),
                to_sql_count(update.counts.created),
                to_sql_count(update.counts.updated),
                to_sql_count(update.counts.deleted),
                to_sql_count(update.counts.errors),
                error_summary,
                update.failure_reason,
                RunStatus::Running.as_str(),
            ],
        )?;
        if changed > 0 {
            return Ok(());
        }

        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM cache_runs WHERE id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .optional()?;
        Err(match status {
            Some(status) => DatabaseError::RunFinished {
                run_id: run_id.to_string(),
                status,
            },
            None => DatabaseError::RunNotFound(run_id.to_string()),
        })
    })
}

pub fn find(db: &Database, run_id: &str) -> Result<Option<CacheRun>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM cache_runs WHERE id = ?1", COLUMNS),
                params![run_id],
                RunRow::from_row,
            )
            .optional()?)
    })?;
    row.map(RunRow::into_run).transpose()
}

/// Most recent runs first, optionally restricted to one institution.
pub fn list_recent(
    db: &Database,
    ror_id: Option<&str>,
    limit: u32,
) -> Result<Vec<CacheRun>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cache_runs WHERE (?1 IS NULL OR ror_id = ?1)
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![ror_id, limit], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(RunRow::into_run).collect()
}

/// Finalizes `running` runs of one (institution, kind) whose last heartbeat
/// is older than `stale_before`, returning how many were touched.
///
/// Runs with a recent heartbeat belong to a live process and are kept.
pub fn interrupt_stale(
    db: &Database,
    ror_id: &str,
    kind: RecordKind,
    stale_before: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE cache_runs SET status = ?1, finished_at = ?2,
             failure_reason = COALESCE(failure_reason, 'process stopped before the run finished')
             WHERE ror_id = ?3 AND kind = ?4 AND status = ?5 AND heartbeat_ms < ?6",
            params![
                RunStatus::Interrupted.as_str(),
                finished_at.to_rfc3339(),
                ror_id,
                kind.as_str(),
                RunStatus::Running.as_str(),
                stale_before.timestamp_millis()
            ],
        )?;
        Ok(changed as u64)
    })
}
