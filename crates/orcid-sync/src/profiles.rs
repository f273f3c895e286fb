//! Researcher names and affiliation-manager status, read from each cached
//! researcher's full ORCID record.
//!
//! A researcher counts as managed by an institution when any affiliation
//! entry on their record was written by one of the institution's trusted API
//! clients: the synchronizer's own client or the institution's affiliation
//! manager client.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{error, info, warn};
use serde_json::Value;
use tracing::Instrument;

use crate::api::{join_url, ApiClient, ApiError};
use crate::model::{Institution, ResearcherProfile, ResearcherStatus, UpsertOutcome};
use crate::records::opt_str_at;
use crate::scheduler::{CancelToken, JobHandler, WorkerPool};
use crate::store::CacheStore;

/// Activity sections holding affiliation groups.
pub const AFFILIATION_SECTIONS: [&str; 7] = [
    "employments",
    "educations",
    "qualifications",
    "invited-positions",
    "distinctions",
    "memberships",
    "services",
];

/// Reads `person.name` of a full record. Missing parts stay `None`.
pub fn parse_profile(researcher_id: &str, record: &Value) -> ResearcherProfile {
    let name = |part: &str| opt_str_at(record, &["person", "name", part, "value"]);
    ResearcherProfile {
        researcher_id: researcher_id.to_string(),
        given_names: name("given-names"),
        family_name: name("family-name"),
        credit_name: name("credit-name"),
    }
}

/// Whether any affiliation summary's `source.source-client-id.path` is one
/// of `trusted`.
pub fn is_managed_by(record: &Value, trusted: &HashSet<String>) -> bool {
    if trusted.is_empty() {
        return false;
    }
    let Some(activities) = record.get("activities-summary") else {
        return false;
    };

    AFFILIATION_SECTIONS
        .iter()
        .filter_map(|section| activities.get(*section)?.get("affiliation-group")?.as_array())
        .flatten()
        .filter_map(|group| group.get("summaries").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_object)
        // The entry sits under a section-specific key, e.g. `employment-summary`.
        .filter_map(|summary| summary.values().find(|v| v.get("source").is_some()))
        .filter_map(|entry| opt_str_at(entry, &["source", "source-client-id", "path"]))
        .any(|client_id| trusted.contains(&client_id))
}

/// Client ids whose affiliation entries mark a researcher as managed.
pub fn trusted_clients(own_client_id: &str, institution: &Institution) -> HashSet<String> {
    [Some(own_client_id), institution.am_client_id.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fetches `/{orcid}/record` from the member API.
pub struct ProfileFetcher {
    client: Arc<ApiClient>,
    member_url: String,
}

impl ProfileFetcher {
    pub fn new(client: Arc<ApiClient>, member_url: impl Into<String>) -> Self {
        Self {
            client,
            member_url: member_url.into(),
        }
    }

    pub async fn fetch_record(&self, researcher_id: &str) -> Result<Value, ApiError> {
        let url = join_url(&self.member_url, &format!("{}/record", researcher_id));
        self.client.fetch(&url, &[]).await
    }
}

/// What a profile sync should cover.
#[derive(Debug, Clone)]
pub struct ProfileSyncOptions {
    /// ROR ids to sync. Empty means every active institution.
    pub targets: Vec<String>,
    pub concurrency: usize,
    pub cancel: CancelToken,
}

impl Default for ProfileSyncOptions {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            concurrency: 4,
            cancel: CancelToken::new(),
        }
    }
}

/// Profile sync results of one institution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstitutionProfiles {
    pub ror_id: String,
    /// Researchers found in the institution's cache.
    pub researchers: usize,
    pub created: u64,
    pub updated: u64,
    /// Researchers whose record carries a trusted affiliation entry.
    pub managed: u64,
    /// Statuses removed for researchers no longer cached.
    pub pruned: u64,
    pub errors: u64,
    pub interrupted: bool,
    /// Set when the institution could not be processed at all.
    pub failure: Option<String>,
}

impl InstitutionProfiles {
    fn new(ror_id: impl Into<String>) -> Self {
        Self {
            ror_id: ror_id.into(),
            ..Default::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some() || (self.researchers > 0 && self.errors as usize == self.researchers)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileReport {
    pub entries: Vec<InstitutionProfiles>,
    pub aborted: Option<String>,
}

impl ProfileReport {
    pub fn has_failures(&self) -> bool {
        self.aborted.is_some() || self.entries.iter().any(InstitutionProfiles::is_failure)
    }

    pub fn find(&self, ror_id: &str) -> Option<&InstitutionProfiles> {
        self.entries.iter().find(|e| e.ror_id == ror_id)
    }
}

impl fmt::Display for ProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.entries {
            if let Some(reason) = &e.failure {
                writeln!(f, "{} profiles: failed ({})", e.ror_id, reason)?;
                continue;
            }
            writeln!(
                f,
                "{} profiles: {} [researchers {}, created {}, updated {}, managed {}, pruned {}, errors {}]",
                e.ror_id,
                if e.interrupted { "interrupted" } else { "done" },
                e.researchers,
                e.created,
                e.updated,
                e.managed,
                e.pruned,
                e.errors
            )?;
        }
        if let Some(reason) = &self.aborted {
            writeln!(f, "aborted: {}", reason)?;
        }
        Ok(())
    }
}

enum ProfileResult {
    Synced { outcome: UpsertOutcome, managed: bool },
    Failed,
    Skipped,
}

/// Syncs the profiles of one institution's cached researchers.
struct ProfileRunner {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<ProfileFetcher>,
    ror_id: String,
    trusted: HashSet<String>,
    cancel: CancelToken,
    abort: CancelToken,
    abort_reason: Arc<Mutex<Option<String>>>,
}

impl ProfileRunner {
    fn stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_cancelled()
    }

    fn abort_with(&self, reason: String) {
        error!("Aborting profile sync: {}", reason);
        let mut slot = self.abort_reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.abort.cancel();
    }

    async fn sync_one(&self, researcher_id: &str) -> ProfileResult {
        let record = match self.fetcher.fetch_record(researcher_id).await {
            Ok(record) => record,
            Err(e) if e.is_token_failure() => {
                self.abort_with(e.to_string());
                return ProfileResult::Skipped;
            }
            Err(e) => {
                warn!("Profile of {} failed: {}", researcher_id, e);
                return ProfileResult::Failed;
            }
        };

        let profile = parse_profile(researcher_id, &record);
        let status = ResearcherStatus {
            ror_id: self.ror_id.clone(),
            researcher_id: researcher_id.to_string(),
            managed_by_am: is_managed_by(&record, &self.trusted),
        };

        let stored = self
            .store
            .upsert_researcher_profile(&profile)
            .and_then(|outcome| self.store.upsert_researcher_status(&status).map(|_| outcome));
        match stored {
            Ok(outcome) => ProfileResult::Synced {
                outcome,
                managed: status.managed_by_am,
            },
            Err(e) => {
                warn!("Could not store profile of {}: {}", researcher_id, e);
                ProfileResult::Failed
            }
        }
    }
}

#[async_trait]
impl JobHandler for ProfileRunner {
    type Job = String;
    type Output = ProfileResult;

    async fn run(&self, researcher_id: String) -> ProfileResult {
        let span = tracing::info_span!("profile", researcher = %researcher_id);
        self.sync_one(&researcher_id).instrument(span).await
    }

    fn skip(&self, _researcher_id: String) -> ProfileResult {
        ProfileResult::Skipped
    }

    fn should_stop(&self) -> bool {
        self.stopping()
    }
}

/// Drives profile syncs institution by institution over a bounded pool.
pub(crate) struct ProfileSync {
    pub store: Arc<dyn CacheStore>,
    pub fetcher: Arc<ProfileFetcher>,
    pub own_client_id: String,
}

impl ProfileSync {
    pub async fn run(
        &self,
        institutions: Vec<Institution>,
        concurrency: usize,
        cancel: CancelToken,
    ) -> ProfileReport {
        let abort = CancelToken::new();
        let abort_reason = Arc::new(Mutex::new(None));
        let mut report = ProfileReport::default();

        for institution in institutions {
            let span = tracing::info_span!("profile_sync", ror = %institution.ror_id);
            let entry = self
                .sync_institution(&institution, concurrency, &cancel, &abort, &abort_reason)
                .instrument(span)
                .await;
            report.entries.push(entry);
        }

        report.aborted = abort_reason.lock().unwrap_or_else(|e| e.into_inner()).clone();
        report
    }

    async fn sync_institution(
        &self,
        institution: &Institution,
        concurrency: usize,
        cancel: &CancelToken,
        abort: &CancelToken,
        abort_reason: &Arc<Mutex<Option<String>>>,
    ) -> InstitutionProfiles {
        let ror_id = institution.ror_id.as_str();
        let mut entry = InstitutionProfiles::new(ror_id);

        if cancel.is_cancelled() || abort.is_cancelled() {
            entry.interrupted = true;
            return entry;
        }

        let researchers = match self.store.cached_researchers(ror_id) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Could not list cached researchers of {}: {}", ror_id, e);
                entry.failure = Some(e.to_string());
                return entry;
            }
        };
        entry.researchers = researchers.len();
        info!("Syncing {} researcher profile(s) for {}", researchers.len(), ror_id);

        if !researchers.is_empty() {
            let runner = Arc::new(ProfileRunner {
                store: Arc::clone(&self.store),
                fetcher: Arc::clone(&self.fetcher),
                ror_id: ror_id.to_string(),
                trusted: trusted_clients(&self.own_client_id, institution),
                cancel: cancel.clone(),
                abort: abort.clone(),
                abort_reason: Arc::clone(abort_reason),
            });

            let pool = WorkerPool::new(Arc::clone(&runner), concurrency.min(researchers.len()));
            for researcher_id in &researchers {
                if pool.submit(researcher_id.clone()).await.is_err() {
                    warn!("Worker pool closed before all researchers were queued");
                    break;
                }
            }

            for result in pool.finish().await {
                match result {
                    ProfileResult::Synced { outcome, managed } => {
                        match outcome {
                            UpsertOutcome::Created => entry.created += 1,
                            UpsertOutcome::Updated => entry.updated += 1,
                            UpsertOutcome::Unchanged => {}
                        }
                        if managed {
                            entry.managed += 1;
                        }
                    }
                    ProfileResult::Failed => entry.errors += 1,
                    ProfileResult::Skipped => {}
                }
            }
            entry.interrupted = runner.stopping();
        }

        // Same rule as cache pruning: an empty cache prunes nothing.
        if !entry.interrupted && !researchers.is_empty() {
            match self.store.delete_researcher_statuses_except(ror_id, &researchers) {
                Ok(pruned) => entry.pruned = pruned,
                Err(e) => warn!("Could not prune researcher statuses of {}: {}", ror_id, e),
            }
        }

        info!(
            "Profiles for {}: created {}, updated {}, managed {}, errors {}",
            ror_id, entry.created, entry.updated, entry.managed, entry.errors
        );
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "person": {"name": {
                "given-names": {"value": "Ada"},
                "family-name": {"value": "Lovelace"},
                "credit-name": null
            }},
            "activities-summary": {
                "employments": {"affiliation-group": [
                    {"summaries": [{"employment-summary": {
                        "source": {"source-name": {"value": "Ada Lovelace"}}
                    }}]}
                ]},
                "memberships": {"affiliation-group": [
                    {"summaries": [{"membership-summary": {
                        "source": {"source-client-id": {"path": "APP-MANAGER000001"}}
                    }}]}
                ]},
                "services": null
            }
        })
    }

    fn trusted(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_profile_names() {
        let profile = parse_profile("0000-0001", &record());
        assert_eq!(profile.given_names.as_deref(), Some("Ada"));
        assert_eq!(profile.family_name.as_deref(), Some("Lovelace"));
        assert_eq!(profile.credit_name, None);

        let empty = parse_profile("0000-0002", &json!({"person": null}));
        assert_eq!(empty, ResearcherProfile {
            researcher_id: "0000-0002".to_string(),
            ..Default::default()
        });
    }

    #[test]
    fn test_managed_by_trusted_client_in_any_section() {
        assert!(is_managed_by(&record(), &trusted(&["APP-MANAGER000001"])));
        assert!(!is_managed_by(&record(), &trusted(&["APP-OTHER"])));
        assert!(!is_managed_by(&record(), &HashSet::new()));
        assert!(!is_managed_by(&json!({}), &trusted(&["APP-MANAGER000001"])));
    }

    #[test]
    fn test_trusted_clients_include_institution_manager() {
        let mut institution = Institution::from_ror("02ap3w078".to_string());
        assert_eq!(trusted_clients("APP-OWN", &institution), trusted(&["APP-OWN"]));

        institution.am_client_id = Some(" APP-AM ".to_string());
        assert_eq!(
            trusted_clients("APP-OWN", &institution),
            trusted(&["APP-OWN", "APP-AM"])
        );
        assert_eq!(trusted_clients("", &institution), trusted(&["APP-AM"]));
    }
}
