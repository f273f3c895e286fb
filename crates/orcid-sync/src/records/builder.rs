//! Per-researcher record building.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};
use tracing::Instrument;

use crate::api::{join_url, ApiClient, ApiError};
use crate::error::{Result, SyncError};
use crate::model::{CacheEntry, RecordKind, RunCounts, RunError, UpsertOutcome};
use crate::store::CacheStore;

use super::summary::{parse_summaries, SummaryItem};
use super::{normalize, MALFORMED_RECORD};

/// Result of building one researcher's records, before anything is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearcherBuild {
    /// New or changed entries to upsert.
    pub entries: Vec<CacheEntry>,
    /// Every record id the upstream summary still lists.
    pub keep_keys: Vec<String>,
    /// Cached record ids the summary no longer lists.
    pub stale_keys: Vec<String>,
    /// Detail documents fetched.
    pub fetched: u64,
    /// Per-record failures; the researcher itself succeeded.
    pub errors: Vec<RunError>,
    /// Detail fetching stopped early on throttling or an outage, so the
    /// stale rows cannot be trusted to be gone upstream.
    pub incomplete: bool,
}

/// Counters and per-record errors from refreshing one researcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearcherOutcome {
    pub counts: RunCounts,
    pub errors: Vec<RunError>,
}

/// Builds cache entries of one kind from ORCID member API records.
pub struct RecordBuilder {
    client: Arc<ApiClient>,
    member_url: String,
    kind: RecordKind,
}

impl RecordBuilder {
    pub fn new(client: Arc<ApiClient>, member_url: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            client,
            member_url: member_url.into(),
            kind,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Diffs the researcher's summary list against `existing` and fetches the
    /// detail of new or advanced records.
    ///
    /// Failing to read the summary fails the researcher. A missing or
    /// rejected detail, or a malformed one, only costs that record. A detail
    /// that stays rate limited or unreachable after retries stops the
    /// researcher's remaining detail fetches and marks the build incomplete.
    /// A token failure aborts.
    pub async fn build_for_researcher(
        &self,
        ror_id: &str,
        researcher_id: &str,
        existing: &HashMap<String, Option<i64>>,
    ) -> std::result::Result<ResearcherBuild, ApiError> {
        let summary_url = join_url(
            &self.member_url,
            &format!("{}/{}", researcher_id, self.kind.summary_path()),
        );
        let body = self.client.fetch(&summary_url, &[]).await?;
        let summaries = parse_summaries(self.kind, &body);

        let mut build = ResearcherBuild::default();
        for _ in 0..summaries.invalid {
            build.errors.push(RunError::new(researcher_id, MALFORMED_RECORD));
        }

        let listed: HashSet<&str> = summaries
            .items
            .iter()
            .map(|i| i.record_id.as_str())
            .collect();
        build.keep_keys = summaries.items.iter().map(|i| i.record_id.clone()).collect();
        build.stale_keys = existing
            .keys()
            .filter(|k| !listed.contains(k.as_str()))
            .cloned()
            .collect();
        build.stale_keys.sort();

        for item in &summaries.items {
            if !needs_fetch(item, existing) {
                continue;
            }

            let detail_url = join_url(
                &self.member_url,
                &format!(
                    "{}/{}/{}",
                    researcher_id,
                    self.kind.detail_path(),
                    item.record_id
                ),
            );
            let detail = match self.client.fetch(&detail_url, &[]).await {
                Ok(detail) => detail,
                Err(e) if e.is_token_failure() => return Err(e),
                Err(e @ (ApiError::RateLimited { .. } | ApiError::Transient { .. })) => {
                    warn!(
                        "Stopping {} details of {} at {}: {}",
                        self.kind, researcher_id, item.record_id, e
                    );
                    build.errors.push(RunError::new(researcher_id, e.kind().as_str()));
                    build.incomplete = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        "Skipping {} {} of {}: {}",
                        self.kind.detail_path(),
                        item.record_id,
                        researcher_id,
                        e
                    );
                    build.errors.push(RunError::new(researcher_id, e.kind().as_str()));
                    continue;
                }
            };
            build.fetched += 1;

            match normalize(self.kind, &detail) {
                Ok(normalized) => build.entries.push(CacheEntry {
                    ror_id: ror_id.to_string(),
                    kind: self.kind,
                    researcher_id: researcher_id.to_string(),
                    record_id: item.record_id.clone(),
                    title: normalized.title,
                    record_type: normalized.record_type,
                    year: normalized.year,
                    source_name: normalized.source_name,
                    visibility: normalized.visibility,
                    last_modified: item.last_modified.or(normalized.last_modified),
                    payload: normalized.payload,
                }),
                Err(e) => {
                    warn!("{} (researcher {}, put-code {})", e, researcher_id, item.record_id);
                    build.errors.push(RunError::new(researcher_id, MALFORMED_RECORD));
                }
            }
        }

        debug!(
            "{} {}: {} listed, {} fetched, {} stale",
            researcher_id,
            self.kind,
            summaries.items.len(),
            build.fetched,
            build.stale_keys.len()
        );
        Ok(build)
    }

    /// Refreshes one researcher's cache rows: build, upsert, then delete
    /// stale rows. Nothing is deleted unless every upsert succeeded and the
    /// build ran to completion.
    pub async fn refresh_researcher(
        &self,
        store: &dyn CacheStore,
        ror_id: &str,
        researcher_id: &str,
    ) -> Result<ResearcherOutcome> {
        let span = tracing::info_span!(
            "researcher",
            ror = %ror_id,
            kind = %self.kind,
            researcher = %researcher_id
        );
        async {
            let existing = store.existing_versions(ror_id, self.kind, researcher_id)?;
            let build = self
                .build_for_researcher(ror_id, researcher_id, &existing)
                .await
                .map_err(|source| SyncError::ResearcherFailed {
                    researcher_id: researcher_id.to_string(),
                    source,
                })?;

            let mut counts = RunCounts {
                fetched: build.fetched,
                errors: build.errors.len() as u64,
                ..Default::default()
            };

            for entry in &build.entries {
                match store.upsert_cache_entry(entry)? {
                    UpsertOutcome::Created => counts.created += 1,
                    UpsertOutcome::Updated => counts.updated += 1,
                    UpsertOutcome::Unchanged => {}
                }
            }

            if build.incomplete {
                debug!(
                    "Keeping {} stale {} rows of {} until a complete pass",
                    build.stale_keys.len(),
                    self.kind,
                    researcher_id
                );
            } else if !build.stale_keys.is_empty() {
                counts.deleted =
                    store.delete_stale_entries(ror_id, self.kind, researcher_id, &build.keep_keys)?;
            }

            Ok::<_, SyncError>(ResearcherOutcome {
                counts,
                errors: build.errors,
            })
        }
        .instrument(span)
        .await
    }
}

/// A record is fetched when it is new, or when either side lacks a
/// timestamp, or when upstream reports a newer modification.
fn needs_fetch(item: &SummaryItem, existing: &HashMap<String, Option<i64>>) -> bool {
    match (existing.get(&item.record_id), item.last_modified) {
        (None, _) => true,
        (Some(Some(cached)), Some(current)) => current > *cached,
        (Some(_), _) => true,
    }
}
