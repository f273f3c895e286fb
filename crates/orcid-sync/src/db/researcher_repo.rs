//! Researcher names (`researchers`) and per-institution management status
//! (`researcher_status`).

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::model::{ResearcherProfile, ResearcherStatus, UpsertOutcome};

use super::{Database, DatabaseError};

fn profile_from_row(row: &Row<'_>) -> Result<ResearcherProfile, rusqlite::Error> {
    Ok(ResearcherProfile {
        researcher_id: row.get("researcher_id")?,
        given_names: row.get("given_names")?,
        family_name: row.get("family_name")?,
        credit_name: row.get("credit_name")?,
    })
}

fn status_from_row(row: &Row<'_>) -> Result<ResearcherStatus, rusqlite::Error> {
    Ok(ResearcherStatus {
        ror_id: row.get("ror_id")?,
        researcher_id: row.get("researcher_id")?,
        managed_by_am: row.get("managed_by_am")?,
    })
}

/// Inserts or replaces a researcher's names. Identical names are left alone.
pub fn upsert_profile(
    db: &Database,
    profile: &ResearcherProfile,
) -> Result<UpsertOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let existing = tx
            .query_row(
                "SELECT researcher_id, given_names, family_name, credit_name
                 FROM researchers WHERE researcher_id = ?1",
                params![profile.researcher_id],
                profile_from_row,
            )
            .optional()?;

        let outcome = match existing {
            Some(ref stored) if stored == profile => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };

        tx.execute(
            "INSERT INTO researchers (researcher_id, given_names, family_name, credit_name, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(researcher_id) DO UPDATE SET
                 given_names = excluded.given_names,
                 family_name = excluded.family_name,
                 credit_name = excluded.credit_name,
                 updated_at = excluded.updated_at",
            params![
                profile.researcher_id,
                profile.given_names,
                profile.family_name,
                profile.credit_name,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(outcome)
    })
}

pub fn find_profile(
    db: &Database,
    researcher_id: &str,
) -> Result<Option<ResearcherProfile>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT researcher_id, given_names, family_name, credit_name
                 FROM researchers WHERE researcher_id = ?1",
                params![researcher_id],
                profile_from_row,
            )
            .optional()?)
    })
}

pub fn upsert_status(db: &Database, status: &ResearcherStatus) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO researcher_status (ror_id, researcher_id, managed_by_am, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ror_id, researcher_id) DO UPDATE SET
                 managed_by_am = excluded.managed_by_am,
                 updated_at = excluded.updated_at",
            params![
                status.ror_id,
                status.researcher_id,
                status.managed_by_am,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    })
}

/// Statuses of one institution ordered by researcher.
pub fn list_statuses(db: &Database, ror_id: &str) -> Result<Vec<ResearcherStatus>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT ror_id, researcher_id, managed_by_am FROM researcher_status
             WHERE ror_id = ?1 ORDER BY researcher_id",
        )?;
        let rows = stmt
            .query_map(params![ror_id], status_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes the institution's statuses of researchers not in `keep`.
pub fn delete_statuses_except(
    db: &Database,
    ror_id: &str,
    keep: &[String],
) -> Result<u64, DatabaseError> {
    let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let researchers: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT researcher_id FROM researcher_status WHERE ror_id = ?1")?;
            let rows = stmt
                .query_map(params![ror_id], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            rows
        };

        let mut deleted = 0u64;
        for researcher_id in researchers.iter().filter(|id| !keep.contains(id.as_str())) {
            deleted += tx.execute(
                "DELETE FROM researcher_status WHERE ror_id = ?1 AND researcher_id = ?2",
                params![ror_id, researcher_id],
            )? as u64;
        }
        tx.commit()?;
        Ok(deleted)
    })
}
