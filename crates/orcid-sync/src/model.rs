//! Core data types shared by the resolver, record builders, scheduler and store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of ORCID activity a cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Work,
    Funding,
}

impl RecordKind {
    /// Returns all record kinds in report order.
    pub fn all() -> &'static [RecordKind] {
        &[RecordKind::Work, RecordKind::Funding]
    }

    /// Stable storage name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Work => "works",
            RecordKind::Funding => "fundings",
        }
    }

    /// Path segment of the per-researcher summary list (`/{orcid}/works`).
    pub fn summary_path(&self) -> &'static str {
        self.as_str()
    }

    /// Path segment of a single record (`/{orcid}/work/{put-code}`).
    pub fn detail_path(&self) -> &'static str {
        match self {
            RecordKind::Work => "work",
            RecordKind::Funding => "funding",
        }
    }

    /// Key of the summary array inside a summary group.
    pub fn summary_key(&self) -> &'static str {
        match self {
            RecordKind::Work => "work-summary",
            RecordKind::Funding => "funding-summary",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "work" | "works" => Ok(RecordKind::Work),
            "funding" | "fundings" => Ok(RecordKind::Funding),
            _ => Err(format!("Unknown record kind: {}", s)),
        }
    }
}

/// An institution known to the local database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub ror_id: String,
    pub name: String,
    pub active: bool,
    pub grid_id: Option<String>,
    /// Client id of the institution's affiliation manager, trusted next to
    /// the sync client's own id.
    pub am_client_id: Option<String>,
}

impl Institution {
    /// An institution that is only known by its ROR id.
    pub fn from_ror(ror_id: impl Into<String>) -> Self {
        let ror_id = ror_id.into();
        Self {
            name: ror_id.clone(),
            ror_id,
            active: true,
            grid_id: None,
            am_client_id: None,
        }
    }
}

/// Strips URL prefixes and slashes from a ROR identifier.
///
/// `https://ror.org/02ap3w078/` and `02ap3w078` both become `02ap3w078`.
pub fn normalize_ror(ror: &str) -> String {
    ror.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A normalized ORCID record stored in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub ror_id: String,
    pub kind: RecordKind,
    pub researcher_id: String,
    /// ORCID put-code of the record.
    pub record_id: String,
    pub title: String,
    pub record_type: String,
    pub year: Option<i32>,
    pub source_name: String,
    pub visibility: String,
    /// Upstream last-modified timestamp in epoch milliseconds.
    pub last_modified: Option<i64>,
    pub payload: serde_json::Value,
}

/// Result of writing one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Lifecycle state of a cache run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Failed => "failed",
            RunStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "partially_failed" => Ok(RunStatus::PartiallyFailed),
            "failed" => Ok(RunStatus::Failed),
            "interrupted" => Ok(RunStatus::Interrupted),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Row counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Detail records fetched from upstream.
    pub fetched: u64,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub errors: u64,
}

impl RunCounts {
    pub fn add(&mut self, other: &RunCounts) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.errors += other.errors;
    }
}

/// One entry of a run's error summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub researcher_id: String,
    /// Machine-readable category, e.g. `not_found` or `malformed_record`.
    pub kind: String,
}

impl RunError {
    pub fn new(researcher_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            researcher_id: researcher_id.into(),
            kind: kind.into(),
        }
    }
}

/// A persisted cache run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRun {
    pub id: String,
    pub ror_id: String,
    pub kind: RecordKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Last time the owning process reported progress.
    pub heartbeat_at: DateTime<Utc>,
    pub counts: RunCounts,
    pub errors: Vec<RunError>,
    pub failure_reason: Option<String>,
}

/// Mutation applied to a run row by `UpdateRun`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub counts: RunCounts,
    pub errors: Vec<RunError>,
    pub failure_reason: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub heartbeat_at: DateTime<Utc>,
}

/// Names from a researcher's ORCID `person` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearcherProfile {
    pub researcher_id: String,
    pub given_names: Option<String>,
    pub family_name: Option<String>,
    pub credit_name: Option<String>,
}

impl ResearcherProfile {
    /// Credit name, else "given family", else the ORCID iD.
    pub fn display_name(&self) -> String {
        if let Some(credit) = &self.credit_name {
            return credit.clone();
        }
        let parts: Vec<&str> = [self.given_names.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            self.researcher_id.clone()
        } else {
            parts.join(" ")
        }
    }
}

/// Whether an institution's affiliation manager has written to a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearcherStatus {
    pub ror_id: String,
    pub researcher_id: String,
    pub managed_by_am: bool,
}
