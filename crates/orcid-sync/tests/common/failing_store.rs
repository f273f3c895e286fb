//! `CacheStore` wrapper that fails selected writes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use orcid_sync::model::{RunUpdate, UpsertOutcome};
use orcid_sync::{
    CacheEntry, CacheStore, Database, DatabaseError, Institution, RecordKind, ResearcherProfile,
    ResearcherStatus,
};

/// Delegates to a `Database`, except that upserting an entry whose record id
/// is in `failing_records` returns an error.
pub struct FailingStore {
    inner: Database,
    failing_records: Mutex<Vec<String>>,
}

impl FailingStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            failing_records: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_upserts_of(&self, record_id: &str) {
        self.failing_records
            .lock()
            .unwrap()
            .push(record_id.to_string());
    }
}

impl CacheStore for FailingStore {
    fn list_institutions(&self) -> Result<Vec<Institution>, DatabaseError> {
        self.inner.list_institutions()
    }

    fn find_institution(&self, ror_id: &str) -> Result<Option<Institution>, DatabaseError> {
        self.inner.find_institution(ror_id)
    }

    fn set_institution_grid(&self, ror_id: &str, grid_id: &str) -> Result<(), DatabaseError> {
        self.inner.set_institution_grid(ror_id, grid_id)
    }

    fn existing_versions(
        &self,
        ror_id: &str,
        kind: RecordKind,
        researcher_id: &str,
    ) -> Result<HashMap<String, Option<i64>>, DatabaseError> {
        self.inner.existing_versions(ror_id, kind, researcher_id)
    }

    fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<UpsertOutcome, DatabaseError> {
        if self
            .failing_records
            .lock()
            .unwrap()
            .contains(&entry.record_id)
        {
            return Err(DatabaseError::LockPoisoned);
        }
        self.inner.upsert_cache_entry(entry)
    }

    fn delete_stale_entries(
        &self,
        ror_id: &str,
        kind: RecordKind,
        researcher_id: &str,
        keep: &[String],
    ) -> Result<u64, DatabaseError> {
        self.inner.delete_stale_entries(ror_id, kind, researcher_id, keep)
    }

    fn delete_researchers_except(
        &self,
        ror_id: &str,
        kind: RecordKind,
        keep_researchers: &[String],
    ) -> Result<u64, DatabaseError> {
        self.inner.delete_researchers_except(ror_id, kind, keep_researchers)
    }

    fn create_run(
        &self,
        ror_id: &str,
        kind: RecordKind,
        started_at: DateTime<Utc>,
    ) -> Result<String, DatabaseError> {
        self.inner.create_run(ror_id, kind, started_at)
    }

    fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<(), DatabaseError> {
        self.inner.update_run(run_id, update)
    }

    fn interrupt_stale_runs(
        &self,
        ror_id: &str,
        kind: RecordKind,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        self.inner.interrupt_stale_runs(ror_id, kind, stale_before, now)
    }

    fn cached_researchers(&self, ror_id: &str) -> Result<Vec<String>, DatabaseError> {
        self.inner.cached_researchers(ror_id)
    }

    fn upsert_researcher_profile(
        &self,
        profile: &ResearcherProfile,
    ) -> Result<UpsertOutcome, DatabaseError> {
        self.inner.upsert_researcher_profile(profile)
    }

    fn upsert_researcher_status(&self, status: &ResearcherStatus) -> Result<(), DatabaseError> {
        self.inner.upsert_researcher_status(status)
    }

    fn delete_researcher_statuses_except(
        &self,
        ror_id: &str,
        keep: &[String],
    ) -> Result<u64, DatabaseError> {
        self.inner.delete_researcher_statuses_except(ror_id, keep)
    }
}
