//! Persistence contract consumed by the sync engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::db::{cache_repo, institution_repo, researcher_repo, run_repo, Database, DatabaseError};
use crate::model::{
    CacheEntry, Institution, RecordKind, ResearcherProfile, ResearcherStatus, RunUpdate,
    UpsertOutcome,
};

/// Storage operations the resolver, builders and run tracker depend on.
///
/// Implementations must be safe to share across workers. Writes are scoped
/// per (institution, kind, researcher), so implementations only need to make
/// each call atomic on its own.
pub trait CacheStore: Send + Sync {
    /// Active institutions in display order.
    fn list_institutions(&self) -> Result<Vec<Institution>, DatabaseError>;

    fn find_institution(&self, ror_id: &str) -> Result<Option<Institution>, DatabaseError>;

    /// Stores the GRID id healed from the ROR registry.
    fn set_institution_grid(&self, ror_id: &str, grid_id: &str) -> Result<(), DatabaseError>;

    /// Cached record ids of one researcher mapped to their last-modified stamp.
    fn existing_versions(
        &self,
        ror_id: &str,
        kind: RecordKind,
        researcher_id: &str,
    ) -> Result<HashMap<String, Option<i64>>, DatabaseError>;

    fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<UpsertOutcome, DatabaseError>;

    /// Deletes the researcher's entries whose record id is not in `keep`.
    fn delete_stale_entries(
        &self,
        ror_id: &str,
        kind: RecordKind,
        researcher_id: &str,
        keep: &[String],
    ) -> Result<u64, DatabaseError>;

    /// Deletes entries of researchers not listed in `keep_researchers`.
    fn delete_researchers_except(
        &self,
        ror_id: &str,
        kind: RecordKind,
        keep_researchers: &[String],
    ) -> Result<u64, DatabaseError>;

    /// Inserts a `Running` run and returns its id. Fails with
    /// `DatabaseError::RunConflict` while the pair already has one.
    fn create_run(
        &self,
        ror_id: &str,
        kind: RecordKind,
        started_at: DateTime<Utc>,
    ) -> Result<String, DatabaseError>;

    fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<(), DatabaseError>;

    /// Finalizes the pair's `Running` runs whose heartbeat predates
    /// `stale_before` as interrupted.
    fn interrupt_stale_runs(
        &self,
        ror_id: &str,
        kind: RecordKind,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;

    /// Researchers with cached entries of any kind at the institution.
    fn cached_researchers(&self, ror_id: &str) -> Result<Vec<String>, DatabaseError>;

    fn upsert_researcher_profile(
        &self,
        profile: &ResearcherProfile,
    ) -> Result<UpsertOutcome, DatabaseError>;

    fn upsert_researcher_status(&self, status: &ResearcherStatus) -> Result<(), DatabaseError>;

    /// Deletes the institution's statuses of researchers not in `keep`.
    fn delete_researcher_statuses_except(
        &self,
        ror_id: &str,
        keep: &[String],
    ) -> Result<u64, DatabaseError>;
}

impl CacheStore for Database {
    fn list_institutions(&self) -> Result<Vec<Institution>, DatabaseError> {
        institution_repo::list_active(self)
    }

    fn find_institution(&self, ror_id: &str) -> Result<Option<Institution>, DatabaseError> {
        institution_repo::find(self, ror_id)
    }

    fn set_institution_grid(&self, ror_id: &str, grid_id: &str) -> Result<(), DatabaseError> {
        institution_repo::set_grid_id(self, ror_id, grid_id)
    }

    fn existing_versions(
        &self,
        ror_id: &str,
        kind: RecordKind,
        researcher_id: &str,
    ) -> Result<HashMap<String, Option<i64>>, DatabaseError> {
        cache_repo::versions(self, ror_id, kind, researcher_id)
    }

    fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<UpsertOutcome, DatabaseError> {
        cache_repo::upsert(self, entry)
    }

    fn delete_stale_entries(
        &self,
        ror_id: &str,
        kind: RecordKind,
        researcher_id: &str,
        keep: &[String],
    ) -> Result<u64, DatabaseError> {
        cache_repo::delete_stale(self, ror_id, kind, researcher_id, keep)
    }

    fn delete_researchers_except(
        &self,
        ror_id: &str,
        kind: RecordKind,
        keep_researchers: &[String],
    ) -> Result<u64, DatabaseError> {
        cache_repo::delete_researchers_except(self, ror_id, kind, keep_researchers)
    }

    fn create_run(
        &self,
        ror_id: &str,
        kind: RecordKind,
        started_at: DateTime<Utc>,
    ) -> Result<String, DatabaseError> {
        run_repo::create(self, ror_id, kind, started_at)
    }

    fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<(), DatabaseError> {
        run_repo::update(self, run_id, update)
    }

    fn interrupt_stale_runs(
        &self,
        ror_id: &str,
        kind: RecordKind,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        run_repo::interrupt_stale(self, ror_id, kind, stale_before, now)
    }

    fn cached_researchers(&self, ror_id: &str) -> Result<Vec<String>, DatabaseError> {
        cache_repo::researchers(self, ror_id)
    }

    fn upsert_researcher_profile(
        &self,
        profile: &ResearcherProfile,
    ) -> Result<UpsertOutcome, DatabaseError> {
        researcher_repo::upsert_profile(self, profile)
    }

    fn upsert_researcher_status(&self, status: &ResearcherStatus) -> Result<(), DatabaseError> {
        researcher_repo::upsert_status(self, status)
    }

    fn delete_researcher_statuses_except(
        &self,
        ror_id: &str,
        keep: &[String],
    ) -> Result<u64, DatabaseError> {
        researcher_repo::delete_statuses_except(self, ror_id, keep)
    }
}
