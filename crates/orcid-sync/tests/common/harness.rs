//! Test harness wiring a scheduler to the fake upstream.

#![allow(dead_code)]

use std::sync::Arc;

use orcid_sync::api::RetryPolicy;
use orcid_sync::db::{cache_repo, institution_repo, run_repo};
use orcid_sync::{
    CacheEntry, CacheRun, CacheStore, CancelToken, Database, RebuildOptions, RecordKind, Report,
    Scheduler, SecretSource, SyncConfig, SystemClock,
};

use super::fake_orcid::{FakeOrcid, MEMBER_URL, ROR_URL, SEARCH_URL, TOKEN_URL};

pub const ROR: &str = "02ap3w078";

/// In-memory database plus a scheduler talking to a `FakeOrcid`.
pub struct TestHarness {
    pub fake: Arc<FakeOrcid>,
    pub db: Database,
    pub scheduler: Arc<Scheduler>,
    pub config: SyncConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    /// Config pointing at the fake with fast retries and no request spacing.
    pub fn config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.orcid.member_url = MEMBER_URL.to_string();
        config.orcid.search_url = SEARCH_URL.to_string();
        config.orcid.token_url = TOKEN_URL.to_string();
        config.orcid.ror_url = ROR_URL.to_string();
        config.orcid.client_id = "APP-TEST0000000001".to_string();
        config.orcid.client_secret = SecretSource {
            value: Some("test-secret".to_string()),
            ..Default::default()
        };
        config.orcid.search_page_size = 100;
        config.http.requests_per_second = 0;
        config.http.retry = RetryPolicy {
            max_retries: 2,
            rate_limit_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            max_retry_after_secs: 120,
        };
        config
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let fake = Arc::new(FakeOrcid::new());
        let db = Database::open_in_memory().expect("Failed to create test database");
        let scheduler = build_scheduler(&config, Arc::new(db.clone()), fake.clone());

        Self {
            fake,
            db,
            scheduler: Arc::new(scheduler),
            config,
        }
    }

    /// Another scheduler on the same fake and config, e.g. a second process
    /// sharing the database or a wrapped store.
    pub fn scheduler_over(&self, store: Arc<dyn CacheStore>) -> Scheduler {
        build_scheduler(&self.config, store, self.fake.clone())
    }

    pub fn register(&self, ror_id: &str, name: &str) {
        institution_repo::upsert(&self.db, ror_id, name).expect("Failed to register institution");
    }

    pub async fn rebuild(&self, options: RebuildOptions) -> Report {
        self.scheduler
            .rebuild_caches(options)
            .await
            .expect("rebuild failed")
    }

    pub fn options(kinds: &[RecordKind]) -> RebuildOptions {
        RebuildOptions {
            targets: vec![ROR.to_string()],
            kinds: kinds.to_vec(),
            concurrency: 2,
            dry_run: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn entries(&self, kind: RecordKind) -> Vec<CacheEntry> {
        cache_repo::list(&self.db, ROR, kind).expect("Failed to list entries")
    }

    pub fn record_ids(&self, kind: RecordKind, researcher: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries(kind)
            .into_iter()
            .filter(|e| e.researcher_id == researcher)
            .map(|e| e.record_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn runs(&self) -> Vec<CacheRun> {
        run_repo::list_recent(&self.db, None, 100).expect("Failed to list runs")
    }
}

fn build_scheduler(config: &SyncConfig, store: Arc<dyn CacheStore>, fake: Arc<FakeOrcid>) -> Scheduler {
    Scheduler::from_config(config, store, fake, Arc::new(SystemClock))
        .expect("Failed to build scheduler")
}
