//! Record builders: summary diffing, detail fetches and normalization.

use serde_json::Value;

pub mod builder;
pub mod funding;
pub mod summary;
pub mod work;

pub use builder::{RecordBuilder, ResearcherBuild, ResearcherOutcome};
pub use summary::{parse_summaries, Summaries, SummaryItem};

use crate::model::RecordKind;

/// Error category recorded when a detail document cannot be normalized.
pub const MALFORMED_RECORD: &str = "malformed_record";

/// A detail document that could not be turned into a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed {kind} record: {reason}")]
pub struct MalformedRecord {
    pub kind: RecordKind,
    pub reason: String,
}

/// Fields extracted from a detail document, common to works and fundings.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub title: String,
    pub record_type: String,
    pub year: Option<i32>,
    pub source_name: String,
    pub visibility: String,
    pub last_modified: Option<i64>,
    pub payload: Value,
}

/// Normalizes a detail document of the given kind.
pub fn normalize(kind: RecordKind, detail: &Value) -> Result<Normalized, MalformedRecord> {
    if !detail.is_object() {
        return Err(MalformedRecord {
            kind,
            reason: "document is not a JSON object".to_string(),
        });
    }
    Ok(match kind {
        RecordKind::Work => work::normalize_work(detail),
        RecordKind::Funding => funding::normalize_funding(detail),
    })
}

fn at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |node, key| node.get(key))
        .filter(|v| !v.is_null())
}

/// String at `path`, numbers rendered as text.
pub(crate) fn opt_str_at(value: &Value, path: &[&str]) -> Option<String> {
    match at(value, path)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// String at `path`, empty when missing.
pub(crate) fn str_at(value: &Value, path: &[&str]) -> String {
    opt_str_at(value, path).unwrap_or_default()
}

pub(crate) fn i64_at(value: &Value, path: &[&str]) -> Option<i64> {
    match at(value, path)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Date components are `{"year": {"value": "2021"}, ...}` strings upstream.
pub(crate) fn date_part(value: &Value, date: &str, part: &str) -> Option<i32> {
    i64_at(value, &[date, part, "value"]).and_then(|n| i32::try_from(n).ok())
}

/// The put-code of a summary or detail document as a string.
pub(crate) fn put_code(value: &Value) -> Option<String> {
    match value.get("put-code")? {
        Value::Number(n) => n.as_u64().map(|c| c.to_string()),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().map(|c| c.to_string())
        }
        _ => None,
    }
}

/// `external-ids.external-id[]` as (lowercased type, value) pairs.
pub(crate) fn external_ids(value: &Value) -> Vec<(String, String)> {
    at(value, &["external-ids", "external-id"])
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|eid| {
                    let id_type = str_at(eid, &["external-id-type"]).to_lowercase();
                    opt_str_at(eid, &["external-id-value"]).map(|v| (id_type, v))
                })
                .collect()
        })
        .unwrap_or_default()
}
