//! Institution repository for the `institutions` table.

use rusqlite::{params, OptionalExtension, Row};

use crate::model::{normalize_ror, Institution};

use super::{Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<Institution, rusqlite::Error> {
    Ok(Institution {
        ror_id: row.get("ror_id")?,
        name: row.get("name")?,
        active: row.get("active")?,
        grid_id: row.get("grid_id")?,
        am_client_id: row.get("am_client_id")?,
    })
}

/// Adds an institution or renames and reactivates an existing one.
/// A known GRID id is preserved.
pub fn upsert(db: &Database, ror_id: &str, name: &str) -> Result<Institution, DatabaseError> {
    let ror_id = normalize_ror(ror_id);
    let name = if name.trim().is_empty() {
        ror_id.as_str()
    } else {
        name.trim()
    };
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO institutions (ror_id, name, active) VALUES (?1, ?2, 1)
             ON CONFLICT(ror_id) DO UPDATE SET name = excluded.name, active = 1",
            params![ror_id, name],
        )?;
        Ok(())
    })?;
    find(db, &ror_id)?.ok_or_else(|| DatabaseError::Corrupt {
        column: "ror_id",
        value: ror_id.clone(),
    })
}

pub fn find(db: &Database, ror_id: &str) -> Result<Option<Institution>, DatabaseError> {
    let ror_id = normalize_ror(ror_id);
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT ror_id, name, active, grid_id, am_client_id FROM institutions WHERE ror_id = ?1",
                params![ror_id],
                from_row,
            )
            .optional()?)
    })
}

/// Active institutions ordered by name.
pub fn list_active(db: &Database) -> Result<Vec<Institution>, DatabaseError> {
    list_where(db, "WHERE active = 1")
}

pub fn list_all(db: &Database) -> Result<Vec<Institution>, DatabaseError> {
    list_where(db, "")
}

fn list_where(db: &Database, filter: &str) -> Result<Vec<Institution>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT ror_id, name, active, grid_id, am_client_id FROM institutions {} \
             ORDER BY name, ror_id",
            filter
        ))?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns false when no such institution exists.
pub fn set_active(db: &Database, ror_id: &str, active: bool) -> Result<bool, DatabaseError> {
    let ror_id = normalize_ror(ror_id);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE institutions SET active = ?2 WHERE ror_id = ?1",
            params![ror_id, active],
        )?;
        Ok(changed > 0)
    })
}

pub fn set_grid_id(db: &Database, ror_id: &str, grid_id: &str) -> Result<(), DatabaseError> {
    let ror_id = normalize_ror(ror_id);
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE institutions SET grid_id = ?2 WHERE ror_id = ?1",
            params![ror_id, grid_id],
        )?;
        Ok(())
    })
}

/// Sets or clears the affiliation-manager client id. Returns false when no
/// such institution exists.
pub fn set_am_client_id(
    db: &Database,
    ror_id: &str,
    am_client_id: Option<&str>,
) -> Result<bool, DatabaseError> {
    let ror_id = normalize_ror(ror_id);
    let am_client_id = am_client_id.map(str::trim).filter(|id| !id.is_empty());
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE institutions SET am_client_id = ?2 WHERE ror_id = ?1",
            params![ror_id, am_client_id],
        )?;
        Ok(changed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_upsert_normalizes_ror() {
        let db = test_db();
        let inst = upsert(&db, "https://ror.org/02ap3w078", "Example University").unwrap();
        assert_eq!(inst.ror_id, "02ap3w078");
        assert!(inst.active);
        assert!(inst.grid_id.is_none());
        assert!(find(&db, "02ap3w078").unwrap().is_some());
    }

    #[test]
    fn test_upsert_defaults_name_and_keeps_grid() {
        let db = test_db();
        upsert(&db, "05x2bcf33", "").unwrap();
        set_grid_id(&db, "05x2bcf33", "grid.1.1").unwrap();

        let inst = upsert(&db, "05x2bcf33", "Renamed").unwrap();
        assert_eq!(inst.name, "Renamed");
        assert_eq!(inst.grid_id.as_deref(), Some("grid.1.1"));

        let fresh = upsert(&db, "00abcdef1", "  ").unwrap();
        assert_eq!(fresh.name, "00abcdef1");
    }

    #[test]
    fn test_list_active_excludes_inactive() {
        let db = test_db();
        upsert(&db, "02ap3w078", "B University").unwrap();
        upsert(&db, "05x2bcf33", "A Institute").unwrap();
        upsert(&db, "00abcdef1", "C College").unwrap();
        assert!(set_active(&db, "00abcdef1", false).unwrap());
        assert!(!set_active(&db, "missing", false).unwrap());

        let active = list_active(&db).unwrap();
        let names: Vec<_> = active.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["A Institute", "B University"]);
        assert_eq!(list_all(&db).unwrap().len(), 3);
    }

    #[test]
    fn test_am_client_id_set_and_cleared() {
        let db = test_db();
        upsert(&db, "02ap3w078", "Example University").unwrap();

        assert!(set_am_client_id(&db, "02ap3w078", Some(" APP-AM0000000001 ")).unwrap());
        let inst = find(&db, "02ap3w078").unwrap().unwrap();
        assert_eq!(inst.am_client_id.as_deref(), Some("APP-AM0000000001"));

        // Renaming keeps the manager id.
        let inst = upsert(&db, "02ap3w078", "Renamed").unwrap();
        assert_eq!(inst.am_client_id.as_deref(), Some("APP-AM0000000001"));

        assert!(set_am_client_id(&db, "02ap3w078", Some("")).unwrap());
        assert!(find(&db, "02ap3w078").unwrap().unwrap().am_client_id.is_none());
        assert!(!set_am_client_id(&db, "missing", None).unwrap());
    }

    #[test]
    fn test_find_missing() {
        let db = test_db();
        assert!(find(&db, "nonexistent").unwrap().is_none());
    }
}
