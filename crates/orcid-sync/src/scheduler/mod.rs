//! Fans institution × kind cache builds out over a bounded worker pool.

pub mod pool;
pub mod report;
pub mod slots;
pub mod task;

pub use pool::{JobHandler, PoolClosed, WorkerPool};
pub use report::{Outcome, PairReport, Report, SkipReason};
pub use slots::{RunSlot, RunSlots};
pub use task::CancelToken;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use tracing::Instrument;

use crate::api::{ApiClient, HttpTransport, RateLimiter, TokenManager};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::model::{normalize_ror, Institution, RecordKind};
use crate::profiles::{ProfileFetcher, ProfileReport, ProfileSync, ProfileSyncOptions};
use crate::records::{RecordBuilder, ResearcherOutcome};
use crate::resolver::InstitutionResolver;
use crate::ror::RorClient;
use crate::runs::RunTracker;
use crate::store::CacheStore;

use task::{PairJob, PairRunner};

/// What a rebuild should cover.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// ROR ids to rebuild. Empty means every active institution.
    pub targets: Vec<String>,
    pub kinds: Vec<RecordKind>,
    /// Worker pool size, shared across all institutions.
    pub concurrency: usize,
    /// Only resolve researchers and report what would be built.
    pub dry_run: bool,
    /// Stops this invocation when cancelled; later invocations bring their own.
    pub cancel: CancelToken,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            kinds: RecordKind::all().to_vec(),
            concurrency: 4,
            dry_run: false,
            cancel: CancelToken::new(),
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn CacheStore>,
    client: Arc<ApiClient>,
    resolver: Arc<InstitutionResolver>,
    works: Arc<RecordBuilder>,
    fundings: Arc<RecordBuilder>,
    ror: Option<RorClient>,
    tracker: RunTracker,
    slots: RunSlots,
    profiles: ProfileSync,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CacheStore>,
        client: Arc<ApiClient>,
        resolver: InstitutionResolver,
        member_url: &str,
    ) -> Self {
        let tracker = RunTracker::new(Arc::clone(&store), Arc::clone(client.clock()));
        let profiles = ProfileSync {
            store: Arc::clone(&store),
            fetcher: Arc::new(ProfileFetcher::new(Arc::clone(&client), member_url)),
            own_client_id: client.tokens().client_id().to_string(),
        };
        Self {
            works: Arc::new(RecordBuilder::new(Arc::clone(&client), member_url, RecordKind::Work)),
            fundings: Arc::new(RecordBuilder::new(
                Arc::clone(&client),
                member_url,
                RecordKind::Funding,
            )),
            resolver: Arc::new(resolver),
            store,
            client,
            ror: None,
            tracker,
            slots: RunSlots::new(),
            profiles,
        }
    }

    /// Heals missing GRID ids from the ROR registry before resolving.
    pub fn with_ror_client(mut self, ror: RorClient) -> Self {
        self.ror = Some(ror);
        self
    }

    /// Overrides how long a silent `Running` run is trusted before another
    /// rebuild of the same pair takes it over.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.tracker = self.tracker.with_stale_after(stale_after);
        self
    }

    /// Wires the token manager, rate limiter, client, resolver and ROR
    /// lookup from configuration.
    pub fn from_config(
        config: &SyncConfig,
        store: Arc<dyn CacheStore>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&transport),
            Arc::clone(&clock),
            config.credentials()?,
            config.token_settings(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            config.http.max_in_flight,
            config.http.requests_per_second,
        ));
        let client = Arc::new(ApiClient::new(
            Arc::clone(&transport),
            tokens,
            limiter,
            clock,
            config.http.retry.clone(),
            config.http.request_timeout(),
        ));
        let resolver = InstitutionResolver::new(Arc::clone(&client), &config.orcid.search_url)
            .with_page_size(config.orcid.search_page_size)
            .with_max_results(config.orcid.search_max_results);
        let ror = RorClient::new(
            transport,
            &config.orcid.ror_url,
            config.http.request_timeout(),
        );

        Ok(Self::new(store, client, resolver, &config.orcid.member_url)
            .with_ror_client(ror)
            .with_stale_after(config.scheduler.stale_after()))
    }

    pub fn slots(&self) -> &RunSlots {
        &self.slots
    }

    /// Rebuilds the caches of every (target, kind) pair in `options`.
    ///
    /// Per-pair problems end up in the report. `Err` is returned for invalid
    /// options, a failing token exchange before any work started, or when
    /// the targets cannot be read from the store.
    pub async fn rebuild_caches(&self, options: RebuildOptions) -> Result<Report> {
        if options.concurrency == 0 {
            return Err(SyncError::InvalidOptions(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let kinds = dedupe_kinds(&options.kinds);
        if kinds.is_empty() {
            return Err(SyncError::InvalidOptions(
                "at least one record kind is required".to_string(),
            ));
        }

        // Fail fast on bad credentials before runs are created.
        self.client.tokens().get_token().await?;

        let mut institutions = self.targets(&options.targets)?;
        for institution in &mut institutions {
            self.heal_grid_id(institution, options.dry_run).await;
        }

        info!(
            "Rebuilding {} institution(s) × {} kind(s), concurrency {}{}",
            institutions.len(),
            kinds.len(),
            options.concurrency,
            if options.dry_run { ", dry run" } else { "" }
        );

        if options.dry_run {
            return Ok(self.plan(&institutions, &kinds).await);
        }

        let runner = Arc::new(PairRunner {
            store: Arc::clone(&self.store),
            resolver: Arc::clone(&self.resolver),
            works: Arc::clone(&self.works),
            fundings: Arc::clone(&self.fundings),
            tracker: self.tracker.clone(),
            slots: self.slots.clone(),
            cancel: options.cancel.clone(),
            abort: CancelToken::new(),
            abort_reason: Mutex::new(None),
        });

        let mut planned = Vec::with_capacity(institutions.len() * kinds.len());
        let pool = WorkerPool::new(Arc::clone(&runner), options.concurrency);
        for institution in institutions {
            for kind in &kinds {
                let position = planned.len();
                planned.push((institution.ror_id.clone(), *kind));
                let job = PairJob {
                    position,
                    institution: institution.clone(),
                    kind: *kind,
                };
                if pool.submit(job).await.is_err() {
                    warn!("Worker pool closed before all pairs were queued");
                    break;
                }
            }
        }

        let mut slots: Vec<Option<PairReport>> = vec![None; planned.len()];
        for (position, report) in pool.finish().await {
            if let Some(slot) = slots.get_mut(position) {
                *slot = Some(report);
            }
        }

        let entries = slots
            .into_iter()
            .zip(planned)
            .map(|(report, (ror_id, kind))| {
                report.unwrap_or_else(|| {
                    PairReport::new(
                        ror_id,
                        kind,
                        Outcome::Failed {
                            reason: "worker stopped before finishing".to_string(),
                        },
                    )
                })
            })
            .collect();

        Ok(Report {
            entries,
            aborted: runner.abort_reason(),
        })
    }

    /// Refreshes one researcher's cached records outside a rebuild.
    pub async fn refresh_researcher(
        &self,
        ror_id: &str,
        kind: RecordKind,
        researcher_id: &str,
    ) -> Result<ResearcherOutcome> {
        let builder = match kind {
            RecordKind::Work => &self.works,
            RecordKind::Funding => &self.fundings,
        };
        builder
            .refresh_researcher(self.store.as_ref(), &normalize_ror(ror_id), researcher_id)
            .await
    }

    /// Refreshes names and affiliation-manager status of every researcher
    /// cached for the targets.
    ///
    /// Run after a rebuild; researchers come from the cache, not from search.
    /// `Err` is returned for invalid options, a failing token exchange before
    /// any work started, or when the targets cannot be read from the store.
    pub async fn sync_researcher_profiles(
        &self,
        options: ProfileSyncOptions,
    ) -> Result<ProfileReport> {
        if options.concurrency == 0 {
            return Err(SyncError::InvalidOptions(
                "concurrency must be at least 1".to_string(),
            ));
        }

        self.client.tokens().get_token().await?;

        let institutions = self.targets(&options.targets)?;
        info!(
            "Syncing researcher profiles for {} institution(s), concurrency {}",
            institutions.len(),
            options.concurrency
        );
        Ok(self
            .profiles
            .run(institutions, options.concurrency, options.cancel)
            .await)
    }

    fn targets(&self, targets: &[String]) -> Result<Vec<Institution>> {
        if targets.is_empty() {
            return Ok(self.store.list_institutions()?);
        }

        let mut seen = HashSet::new();
        let mut institutions = Vec::new();
        for target in targets {
            let ror_id = normalize_ror(target);
            if ror_id.is_empty() {
                return Err(SyncError::InvalidOptions(format!(
                    "'{}' is not a ROR id",
                    target
                )));
            }
            if !seen.insert(ror_id.clone()) {
                continue;
            }
            let institution = match self.store.find_institution(&ror_id)? {
                Some(institution) => institution,
                None => {
                    warn!("{} is not a registered institution, building it anyway", ror_id);
                    Institution::from_ror(ror_id)
                }
            };
            institutions.push(institution);
        }
        Ok(institutions)
    }

    async fn heal_grid_id(&self, institution: &mut Institution, dry_run: bool) {
        let Some(ror) = &self.ror else {
            return;
        };
        if institution.grid_id.is_some() {
            return;
        }

        match ror.fetch_grid_id(&institution.ror_id).await {
            Ok(Some(grid_id)) => {
                info!("Found GRID id {} for {}", grid_id, institution.ror_id);
                if !dry_run {
                    if let Err(e) = self.store.set_institution_grid(&institution.ror_id, &grid_id) {
                        warn!("Could not store GRID id for {}: {}", institution.ror_id, e);
                    }
                }
                institution.grid_id = Some(grid_id);
            }
            Ok(None) => {}
            Err(e) => warn!("GRID lookup for {} failed: {}", institution.ror_id, e),
        }
    }

    /// Dry run: researcher counts per pair, nothing written.
    async fn plan(&self, institutions: &[Institution], kinds: &[RecordKind]) -> Report {
        let mut report = Report::default();

        for institution in institutions {
            let ror_id = institution.ror_id.as_str();
            let span = tracing::info_span!("plan", ror = %ror_id);
            let resolved = self
                .resolver
                .resolve_with_grid(ror_id, institution.grid_id.as_deref())
                .instrument(span)
                .await;

            let outcome = match resolved {
                Ok(ids) => Outcome::Planned {
                    researchers: ids.len(),
                },
                Err(source) => {
                    let err = SyncError::ResolverFailed {
                        ror: ror_id.to_string(),
                        source,
                    };
                    warn!("{}", err);
                    if err.is_token_failure() && report.aborted.is_none() {
                        report.aborted = Some(err.to_string());
                    }
                    Outcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };

            for kind in kinds {
                report
                    .entries
                    .push(PairReport::new(ror_id, *kind, outcome.clone()));
            }
        }

        report
    }
}

fn dedupe_kinds(kinds: &[RecordKind]) -> Vec<RecordKind> {
    let mut out = Vec::new();
    for kind in kinds {
        if !out.contains(kind) {
            out.push(*kind);
        }
    }
    out
}
