//! One (institution, kind) cache build, executed by a pool worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{error, info, warn};
use tracing::Instrument;

use crate::db::DatabaseError;
use crate::error::SyncError;
use crate::model::{Institution, RecordKind, RunStatus};
use crate::records::RecordBuilder;
use crate::resolver::InstitutionResolver;
use crate::runs::{RunHandle, RunTracker};
use crate::store::CacheStore;

use super::pool::JobHandler;
use super::report::{Outcome, PairReport, SkipReason};
use super::slots::RunSlots;

/// Cooperative cancellation flag, one per invocation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A pair queued for building. `position` orders the final report.
pub(crate) struct PairJob {
    pub position: usize,
    pub institution: Institution,
    pub kind: RecordKind,
}

/// State shared by all workers of one rebuild invocation.
pub(crate) struct PairRunner {
    pub store: Arc<dyn CacheStore>,
    pub resolver: Arc<InstitutionResolver>,
    pub works: Arc<RecordBuilder>,
    pub fundings: Arc<RecordBuilder>,
    pub tracker: RunTracker,
    pub slots: RunSlots,
    /// Cancellation requested by the caller.
    pub cancel: CancelToken,
    /// Set when the invocation must stop, e.g. the token is gone.
    pub abort: CancelToken,
    pub abort_reason: Mutex<Option<String>>,
}

impl PairRunner {
    fn builder(&self, kind: RecordKind) -> &RecordBuilder {
        match kind {
            RecordKind::Work => self.works.as_ref(),
            RecordKind::Funding => self.fundings.as_ref(),
        }
    }

    fn stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_cancelled()
    }

    /// Records the first abort reason and stops every worker.
    fn abort_with(&self, reason: String) {
        error!("Aborting rebuild: {}", reason);
        let mut slot = self.abort_reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.abort.cancel();
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn stop_reason(&self) -> String {
        self.abort_reason()
            .unwrap_or_else(|| "cancelled".to_string())
    }

    async fn build_pair(&self, institution: &Institution, kind: RecordKind) -> PairReport {
        let ror_id = institution.ror_id.as_str();

        let Some(_slot) = self.slots.try_acquire(ror_id, kind) else {
            info!("Skipping {} {}: a run is already in flight", ror_id, kind);
            return PairReport::new(
                ror_id,
                kind,
                Outcome::Skipped {
                    reason: SkipReason::AlreadyRunning,
                },
            );
        };

        let run = match self.tracker.start(ror_id, kind) {
            Ok(run) => run,
            Err(DatabaseError::RunConflict { .. }) => {
                info!("Skipping {} {}: another process is building it", ror_id, kind);
                return PairReport::new(
                    ror_id,
                    kind,
                    Outcome::Skipped {
                        reason: SkipReason::AlreadyRunning,
                    },
                );
            }
            Err(e) => {
                error!("Could not create {} run for {}: {}", kind, ror_id, e);
                return PairReport::new(
                    ror_id,
                    kind,
                    Outcome::Failed {
                        reason: format!("could not create run: {}", e),
                    },
                );
            }
        };

        self.execute(institution, kind, run).await
    }

    async fn execute(&self, institution: &Institution, kind: RecordKind, mut run: RunHandle) -> PairReport {
        let ror_id = institution.ror_id.as_str();
        let run_id = run.id().to_string();

        let researchers = match self
            .resolver
            .resolve_with_grid(ror_id, institution.grid_id.as_deref())
            .await
        {
            Ok(ids) => ids,
            Err(source) => {
                let err = SyncError::ResolverFailed {
                    ror: ror_id.to_string(),
                    source,
                };
                if err.is_token_failure() {
                    self.abort_with(err.to_string());
                }
                warn!("{}", err);
                return self.finalize(ror_id, kind, run, RunStatus::Failed, Some(err.to_string()));
            }
        };

        run.set_researchers(researchers.len());
        if let Err(e) = run.checkpoint() {
            warn!("Could not checkpoint run {}: {}", run_id, e);
        }

        let builder = self.builder(kind);
        let mut interrupted = false;

        for researcher_id in &researchers {
            if self.stopping() {
                interrupted = true;
                break;
            }

            match builder
                .refresh_researcher(self.store.as_ref(), ror_id, researcher_id)
                .await
            {
                Ok(outcome) => run.record_researcher(outcome),
                Err(e) if e.is_token_failure() => {
                    self.abort_with(e.to_string());
                    interrupted = true;
                    break;
                }
                Err(SyncError::ResearcherFailed { source, .. }) => {
                    warn!("Researcher {} failed for {} {}: {}", researcher_id, ror_id, kind, source);
                    run.record_researcher_failure(researcher_id, source.kind().as_str());
                }
                Err(e) => {
                    warn!("Researcher {} failed for {} {}: {}", researcher_id, ror_id, kind, e);
                    run.record_researcher_failure(researcher_id, "storage");
                }
            }

            if let Err(e) = run.checkpoint() {
                warn!("Could not checkpoint run {}: {}", run_id, e);
            }
        }

        if interrupted {
            let reason = self.stop_reason();
            return self.finalize(ror_id, kind, run, RunStatus::Interrupted, Some(reason));
        }

        // An empty result is more likely an upstream glitch than a lost
        // affiliation, so pruning needs at least one resolved researcher.
        if !researchers.is_empty() {
            match self.store.delete_researchers_except(ror_id, kind, &researchers) {
                Ok(deleted) => {
                    if deleted > 0 {
                        info!("Pruned {} {} entries of unaffiliated researchers at {}", deleted, kind, ror_id);
                    }
                    run.record_deleted(deleted);
                }
                Err(e) => warn!("Could not prune {} entries for {}: {}", kind, ror_id, e),
            }
        }

        let status = run.status(false);
        let reason = (status == RunStatus::Failed)
            .then(|| format!("all {} researchers failed", researchers.len()));
        self.finalize(ror_id, kind, run, status, reason)
    }

    fn finalize(
        &self,
        ror_id: &str,
        kind: RecordKind,
        run: RunHandle,
        status: RunStatus,
        reason: Option<String>,
    ) -> PairReport {
        let run_id = run.id().to_string();
        let counts = run.counts();

        let outcome = match status {
            RunStatus::Succeeded => Outcome::Succeeded,
            RunStatus::PartiallyFailed => Outcome::PartiallyFailed {
                errors: counts.errors,
            },
            RunStatus::Interrupted => Outcome::Interrupted {
                reason: reason.clone().unwrap_or_else(|| "cancelled".to_string()),
            },
            RunStatus::Failed | RunStatus::Running => Outcome::Failed {
                reason: reason.clone().unwrap_or_else(|| "run failed".to_string()),
            },
        };

        let outcome = match run.finish(status, reason) {
            Ok(_) => outcome,
            Err(e) => {
                error!("Could not finalize run {}: {}", run_id, e);
                Outcome::Failed {
                    reason: format!("could not finalize run: {}", e),
                }
            }
        };

        PairReport {
            ror_id: ror_id.to_string(),
            kind,
            outcome,
            run_id: Some(run_id),
            counts,
        }
    }
}

#[async_trait]
impl JobHandler for PairRunner {
    type Job = PairJob;
    type Output = (usize, PairReport);

    async fn run(&self, job: PairJob) -> (usize, PairReport) {
        let span = tracing::info_span!(
            "cache_build",
            ror = %job.institution.ror_id,
            kind = %job.kind
        );
        let report = self
            .build_pair(&job.institution, job.kind)
            .instrument(span)
            .await;
        (job.position, report)
    }

    fn skip(&self, job: PairJob) -> (usize, PairReport) {
        (
            job.position,
            PairReport::new(
                job.institution.ror_id,
                job.kind,
                Outcome::Skipped {
                    reason: SkipReason::Cancelled,
                },
            ),
        )
    }

    fn should_stop(&self) -> bool {
        self.stopping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
