//! Cache entry repository for the `cache_entries` table.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{CacheEntry, RecordKind, UpsertOutcome};

use super::{Database, DatabaseError};

const COLUMNS: &str = "ror_id, kind, researcher_id, record_id, title, record_type, year, \
                       source_name, visibility, last_modified, payload";

/// A raw row; `kind` and `payload` are decoded by `into_entry`.
struct EntryRow {
    ror_id: String,
    kind: String,
    researcher_id: String,
    record_id: String,
    title: String,
    record_type: String,
    year: Option<i32>,
    source_name: String,
    visibility: String,
    last_modified: Option<i64>,
    payload: String,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            ror_id: row.get("ror_id")?,
            kind: row.get("kind")?,
            researcher_id: row.get("researcher_id")?,
            record_id: row.get("record_id")?,
            title: row.get("title")?,
            record_type: row.get("record_type")?,
            year: row.get("year")?,
            source_name: row.get("source_name")?,
            visibility: row.get("visibility")?,
            last_modified: row.get("last_modified")?,
            payload: row.get("payload")?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, DatabaseError> {
        let kind = self
            .kind
            .parse::<RecordKind>()
            .map_err(|_| DatabaseError::Corrupt {
                column: "kind",
                value: self.kind.clone(),
            })?;
        let payload = serde_json::from_str(&self.payload).map_err(|_| DatabaseError::Corrupt {
            column: "payload",
            value: self.payload.clone(),
        })?;
        Ok(CacheEntry {
            ror_id: self.ror_id,
            kind,
            researcher_id: self.researcher_id,
            record_id: self.record_id,
            title: self.title,
            record_type: self.record_type,
            year: self.year,
            source_name: self.source_name,
            visibility: self.visibility,
            last_modified: self.last_modified,
            payload,
        })
    }
}

fn find_in(conn: &Connection, entry: &CacheEntry) -> Result<Option<CacheEntry>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM cache_entries
                 WHERE ror_id = ?1 AND kind = ?2 AND researcher_id = ?3 AND record_id = ?4",
                COLUMNS
            ),
            params![
                entry.ror_id,
                entry.kind.as_str(),
                entry.researcher_id,
                entry.record_id
            ],
            EntryRow::from_row,
        )
        .optional()?;
    row.map(EntryRow::into_entry).transpose()
}

/// Inserts or updates one entry. Rewriting identical content is reported as
/// `Unchanged` and leaves the row untouched.
pub fn upsert(db: &Database, entry: &CacheEntry) -> Result<UpsertOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let outcome = match find_in(conn, entry)? {
            Some(current) if current == *entry => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };

        conn.execute(
            &format!(
                "INSERT INTO cache_entries ({}, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(ror_id, kind, researcher_id, record_id) DO UPDATE SET
                    title = excluded.title,
                    record_type = excluded.record_type,
                    year = excluded.year,
                    source_name = excluded.source_name,
                    visibility = excluded.visibility,
                    last_modified = excluded.last_modified,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at",
                COLUMNS
            ),
            params![
                entry.ror_id,
                entry.kind.as_str(),
                entry.researcher_id,
                entry.record_id,
                entry.title,
                entry.record_type,
                entry.year,
                entry.source_name,
                entry.visibility,
                entry.last_modified,
                entry.payload.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(outcome)
    })
}

/// Record ids cached for one researcher, with their last-modified stamps.
pub fn versions(
    db: &Database,
    ror_id: &str,
    kind: RecordKind,
    researcher_id: &str,
) -> Result<HashMap<String, Option<i64>>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT record_id, last_modified FROM cache_entries
             WHERE ror_id = ?1 AND kind = ?2 AND researcher_id = ?3",
        )?;
        let versions = stmt
            .query_map(params![ror_id, kind.as_str(), researcher_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, Option<i64>>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(versions)
    })
}

/// Deletes the researcher's entries whose record id is not in `keep`.
pub fn delete_stale(
    db: &Database,
    ror_id: &str,
    kind: RecordKind,
    researcher_id: &str,
    keep: &[String],
) -> Result<u64, DatabaseError> {
    let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let cached: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT record_id FROM cache_entries
                 WHERE ror_id = ?1 AND kind = ?2 AND researcher_id = ?3",
            )?;
            let rows = stmt
                .query_map(params![ror_id, kind.as_str(), researcher_id], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            rows
        };

        let mut deleted = 0u64;
        for record_id in cached.iter().filter(|id| !keep.contains(id.as_str())) {
            deleted += tx.execute(
                "DELETE FROM cache_entries
                 WHERE ror_id = ?1 AND kind = ?2 AND researcher_id = ?3 AND record_id = ?4",
                params![ror_id, kind.as_str(), researcher_id, record_id],
            )? as u64;
        }
        tx.commit()?;
        Ok(deleted)
    })
}

/// Deletes every entry of researchers not in `keep_researchers`.
pub fn delete_researchers_except(
    db: &Database,
    ror_id: &str,
    kind: RecordKind,
    keep_researchers: &[String],
) -> Result<u64, DatabaseError> {
    let keep: HashSet<&str> = keep_researchers.iter().map(String::as_str).collect();
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let researchers: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT researcher_id FROM cache_entries WHERE ror_id = ?1 AND kind = ?2",
            )?;
            let rows = stmt
                .query_map(params![ror_id, kind.as_str()], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            rows
        };

        let mut deleted = 0u64;
        for researcher_id in researchers.iter().filter(|id| !keep.contains(id.as_str())) {
            deleted += tx.execute(
                "DELETE FROM cache_entries WHERE ror_id = ?1 AND kind = ?2 AND researcher_id = ?3",
                params![ror_id, kind.as_str(), researcher_id],
            )? as u64;
        }
        tx.commit()?;
        Ok(deleted)
    })
}

/// All entries of one institution and kind, ordered by researcher and record.
pub fn list(db: &Database, ror_id: &str, kind: RecordKind) -> Result<Vec<CacheEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cache_entries WHERE ror_id = ?1 AND kind = ?2
             ORDER BY researcher_id, record_id",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![ror_id, kind.as_str()], EntryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    })
}

/// Distinct researchers with cached entries of any kind at an institution.
pub fn researchers(db: &Database, ror_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT researcher_id FROM cache_entries WHERE ror_id = ?1
             ORDER BY researcher_id",
        )?;
        let rows = stmt
            .query_map(params![ror_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    })
}

pub fn count(db: &Database, ror_id: &str, kind: RecordKind) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE ror_id = ?1 AND kind = ?2",
            params![ror_id, kind.as_str()],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn entry(researcher: &str, record: &str, title: &str) -> CacheEntry {
        CacheEntry {
            ror_id: "02ap3w078".to_string(),
            kind: RecordKind::Work,
            researcher_id: researcher.to_string(),
            record_id: record.to_string(),
            title: title.to_string(),
            record_type: "journal-article".to_string(),
            year: Some(2021),
            source_name: "Crossref".to_string(),
            visibility: "public".to_string(),
            last_modified: Some(1_700_000_000_000),
            payload: json!({"doi": "10.1/x"}),
        }
    }

    #[test]
    fn test_upsert_outcomes() {
        let db = test_db();
        let mut e = entry("0000-0001", "101", "First");
        assert_eq!(upsert(&db, &e).unwrap(), UpsertOutcome::Created);
        assert_eq!(upsert(&db, &e).unwrap(), UpsertOutcome::Unchanged);

        e.title = "First (revised)".to_string();
        e.last_modified = Some(1_700_000_000_500);
        assert_eq!(upsert(&db, &e).unwrap(), UpsertOutcome::Updated);

        let stored = list(&db, "02ap3w078", RecordKind::Work).unwrap();
        assert_eq!(stored, vec![e]);
    }

    #[test]
    fn test_researchers_span_both_kinds() {
        let db = test_db();
        upsert(&db, &entry("0000-0002", "101", "Work")).unwrap();
        upsert(&db, &entry("0000-0002", "102", "Another")).unwrap();
        let mut funding = entry("0000-0001", "201", "Grant");
        funding.kind = RecordKind::Funding;
        upsert(&db, &funding).unwrap();
        let mut elsewhere = entry("0000-0003", "301", "Elsewhere");
        elsewhere.ror_id = "05x2bcf33".to_string();
        upsert(&db, &elsewhere).unwrap();

        assert_eq!(
            researchers(&db, "02ap3w078").unwrap(),
            vec!["0000-0001", "0000-0002"]
        );
    }

    #[test]
    fn test_kinds_are_separate() {
        let db = test_db();
        let work = entry("0000-0001", "101", "Work");
        let mut funding = work.clone();
        funding.kind = RecordKind::Funding;

        assert_eq!(upsert(&db, &work).unwrap(), UpsertOutcome::Created);
        assert_eq!(upsert(&db, &funding).unwrap(), UpsertOutcome::Created);
        assert_eq!(count(&db, "02ap3w078", RecordKind::Work).unwrap(), 1);
        assert_eq!(count(&db, "02ap3w078", RecordKind::Funding).unwrap(), 1);
    }

    #[test]
    fn test_versions() {
        let db = test_db();
        upsert(&db, &entry("0000-0001", "101", "A")).unwrap();
        let mut undated = entry("0000-0001", "102", "B");
        undated.last_modified = None;
        upsert(&db, &undated).unwrap();
        upsert(&db, &entry("0000-0002", "201", "C")).unwrap();

        let versions = versions(&db, "02ap3w078", RecordKind::Work, "0000-0001").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions["101"], Some(1_700_000_000_000));
        assert_eq!(versions["102"], None);
    }

    #[test]
    fn test_delete_stale_is_scoped_to_researcher() {
        let db = test_db();
        upsert(&db, &entry("0000-0001", "101", "A")).unwrap();
        upsert(&db, &entry("0000-0001", "102", "B")).unwrap();
        upsert(&db, &entry("0000-0002", "103", "C")).unwrap();

        let deleted = delete_stale(
            &db,
            "02ap3w078",
            RecordKind::Work,
            "0000-0001",
            &["101".to_string()],
        )
        .unwrap();
        assert_eq!(deleted, 1);

        let ids: Vec<_> = list(&db, "02ap3w078", RecordKind::Work)
            .unwrap()
            .into_iter()
            .map(|e| e.record_id)
            .collect();
        assert_eq!(ids, vec!["101", "103"]);
    }

    #[test]
    fn test_delete_researchers_except() {
        let db = test_db();
        upsert(&db, &entry("0000-0001", "101", "A")).unwrap();
        upsert(&db, &entry("0000-0002", "201", "B")).unwrap();
        upsert(&db, &entry("0000-0002", "202", "C")).unwrap();

        let deleted = delete_researchers_except(
            &db,
            "02ap3w078",
            RecordKind::Work,
            &["0000-0001".to_string()],
        )
        .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(count(&db, "02ap3w078", RecordKind::Work).unwrap(), 1);
    }
}
