//! Run bookkeeping for one (institution, kind) cache build.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::clock::Clock;
use crate::db::DatabaseError;
use crate::model::{RecordKind, RunCounts, RunError, RunStatus, RunUpdate};
use crate::records::ResearcherOutcome;
use crate::store::CacheStore;

/// Final status of a run from what happened during it.
///
/// A failed resolver, or every researcher failing, fails the run. Any other
/// error makes it partial.
pub fn compute_status(
    resolver_failed: bool,
    researchers: usize,
    failed_researchers: usize,
    errors: u64,
) -> RunStatus {
    if resolver_failed {
        RunStatus::Failed
    } else if errors == 0 {
        RunStatus::Succeeded
    } else if researchers > 0 && failed_researchers >= researchers {
        RunStatus::Failed
    } else {
        RunStatus::PartiallyFailed
    }
}

/// What a finalized run looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub errors: Vec<RunError>,
    pub failure_reason: Option<String>,
}

/// A `Running` run without a heartbeat for this long is presumed dead.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Creates runs. One tracker is shared by all workers.
#[derive(Clone)]
pub struct RunTracker {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl RunTracker {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Inserts a `Running` run and hands its only writer to the caller.
    ///
    /// A run of the same pair left behind by a dead process (no heartbeat
    /// within the lease) is interrupted first. A live one, here or in another
    /// process, makes this fail with `DatabaseError::RunConflict`.
    pub fn start(&self, ror_id: &str, kind: RecordKind) -> Result<RunHandle, DatabaseError> {
        let now = self.clock.utc_now();
        let stale_before = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease));
        if let Some(stale_before) = stale_before {
            let recovered = self.store.interrupt_stale_runs(ror_id, kind, stale_before, now)?;
            if recovered > 0 {
                warn!(
                    "Interrupted {} stale {} run(s) for {} left by a stopped process",
                    recovered, kind, ror_id
                );
            }
        }

        let id = self.store.create_run(ror_id, kind, now)?;
        info!("Started {} run {} for {}", kind, id, ror_id);
        Ok(RunHandle {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            id,
            ror_id: ror_id.to_string(),
            kind,
            counts: RunCounts::default(),
            errors: Vec::new(),
            researchers: 0,
            failed_researchers: 0,
        })
    }
}

/// The single writer of one run. `finish` consumes it, so a run is
/// finalized at most once.
pub struct RunHandle {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    id: String,
    ror_id: String,
    kind: RecordKind,
    counts: RunCounts,
    errors: Vec<RunError>,
    researchers: usize,
    failed_researchers: usize,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn counts(&self) -> RunCounts {
        self.counts
    }

    /// Number of researchers the resolver returned for this run.
    pub fn set_researchers(&mut self, researchers: usize) {
        self.researchers = researchers;
    }

    pub fn record_researcher(&mut self, outcome: ResearcherOutcome) {
        self.counts.add(&outcome.counts);
        self.errors.extend(outcome.errors);
    }

    pub fn record_researcher_failure(&mut self, researcher_id: &str, kind: &str) {
        self.failed_researchers += 1;
        self.counts.errors += 1;
        self.errors.push(RunError::new(researcher_id, kind));
    }

    pub fn record_deleted(&mut self, deleted: u64) {
        self.counts.deleted += deleted;
    }

    /// Persists the counters so far and renews the heartbeat; the run stays
    /// `Running`.
    pub fn checkpoint(&self) -> Result<(), DatabaseError> {
        self.store.update_run(
            &self.id,
            &RunUpdate {
                status: RunStatus::Running,
                counts: self.counts,
                errors: self.errors.clone(),
                failure_reason: None,
                finished_at: None,
                heartbeat_at: self.clock.utc_now(),
            },
        )
    }

    /// Status derived from the recorded outcomes.
    pub fn status(&self, resolver_failed: bool) -> RunStatus {
        compute_status(
            resolver_failed,
            self.researchers,
            self.failed_researchers,
            self.counts.errors,
        )
    }

    pub fn finish(
        self,
        status: RunStatus,
        failure_reason: Option<String>,
    ) -> Result<RunSummary, DatabaseError> {
        let status = if status.is_terminal() {
            status
        } else {
            warn!("Run {} finished without a terminal status, marking failed", self.id);
            RunStatus::Failed
        };

        let now = self.clock.utc_now();
        self.store.update_run(
            &self.id,
            &RunUpdate {
                status,
                counts: self.counts,
                errors: self.errors.clone(),
                failure_reason: failure_reason.clone(),
                finished_at: Some(now),
                heartbeat_at: now,
            },
        )?;

        info!(
            "Finished {} run {} for {}: {} (fetched {}, created {}, updated {}, deleted {}, errors {})",
            self.kind,
            self.id,
            self.ror_id,
            status,
            self.counts.fetched,
            self.counts.created,
            self.counts.updated,
            self.counts.deleted,
            self.counts.errors
        );

        Ok(RunSummary {
            run_id: self.id,
            status,
            counts: self.counts,
            errors: self.errors,
            failure_reason,
        })
    }
}
