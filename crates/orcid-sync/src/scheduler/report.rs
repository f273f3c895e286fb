//! Rebuild report returned to callers.

use std::fmt;

use crate::model::{RecordKind, RunCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run for the same (institution, kind) holds the slot.
    AlreadyRunning,
    /// The rebuild was cancelled before this pair started.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRunning => f.write_str("already running"),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What happened to one (institution, kind) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    PartiallyFailed { errors: u64 },
    Failed { reason: String },
    Skipped { reason: SkipReason },
    /// Stopped between researchers; entries written so far are kept.
    Interrupted { reason: String },
    /// Dry run: the pair would process this many researchers.
    Planned { researchers: usize },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => f.write_str("succeeded"),
            Outcome::PartiallyFailed { errors } => write!(f, "partially failed (errors={})", errors),
            Outcome::Failed { reason } => write!(f, "failed ({})", reason),
            Outcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            Outcome::Interrupted { reason } => write!(f, "interrupted ({})", reason),
            Outcome::Planned { researchers } => write!(f, "planned (researchers={})", researchers),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairReport {
    pub ror_id: String,
    pub kind: RecordKind,
    pub outcome: Outcome,
    /// Absent when no run was created (skipped, dry run).
    pub run_id: Option<String>,
    pub counts: RunCounts,
}

impl PairReport {
    pub fn new(ror_id: impl Into<String>, kind: RecordKind, outcome: Outcome) -> Self {
        Self {
            ror_id: ror_id.into(),
            kind,
            outcome,
            run_id: None,
            counts: RunCounts::default(),
        }
    }
}

/// Outcomes ordered by target, then kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub entries: Vec<PairReport>,
    /// Why the invocation stopped early, e.g. the token could not be refreshed.
    pub aborted: Option<String>,
}

impl Report {
    /// True if the invocation was aborted or any pair failed.
    pub fn has_failures(&self) -> bool {
        self.aborted.is_some() || self.entries.iter().any(|e| e.outcome.is_failure())
    }

    pub fn totals(&self) -> RunCounts {
        let mut totals = RunCounts::default();
        for entry in &self.entries {
            totals.add(&entry.counts);
        }
        totals
    }

    pub fn find(&self, ror_id: &str, kind: RecordKind) -> Option<&PairReport> {
        self.entries
            .iter()
            .find(|e| e.ror_id == ror_id && e.kind == kind)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{} {}: {}", entry.ror_id, entry.kind, entry.outcome)?;
            if entry.run_id.is_some() {
                let c = &entry.counts;
                write!(
                    f,
                    " [fetched {}, created {}, updated {}, deleted {}, errors {}]",
                    c.fetched, c.created, c.updated, c.deleted, c.errors
                )?;
            }
            writeln!(f)?;
        }
        if let Some(reason) = &self.aborted {
            writeln!(f, "aborted: {}", reason)?;
        }
        Ok(())
    }
}
