//! Parsing of per-researcher summary lists (`/{orcid}/works`, `/{orcid}/fundings`).

use std::collections::HashSet;

use serde_json::Value;

use crate::model::RecordKind;

use super::{i64_at, put_code};

/// One summary row: the record's put-code and upstream modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryItem {
    pub record_id: String,
    pub last_modified: Option<i64>,
}

/// Parsed summary list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summaries {
    pub items: Vec<SummaryItem>,
    /// Rows skipped because their put-code could not be read.
    pub invalid: usize,
}

/// Flattens `group[].{work,funding}-summary[]` into summary items.
///
/// Duplicate put-codes keep their first occurrence.
pub fn parse_summaries(kind: RecordKind, body: &Value) -> Summaries {
    let mut summaries = Summaries::default();
    let mut seen = HashSet::new();

    let groups = body
        .get("group")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for group in groups {
        let rows = group
            .get(kind.summary_key())
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for row in rows {
            let Some(record_id) = put_code(row) else {
                summaries.invalid += 1;
                continue;
            };
            if !seen.insert(record_id.clone()) {
                continue;
            }
            summaries.items.push(SummaryItem {
                record_id,
                last_modified: i64_at(row, &["last-modified-date", "value"]),
            });
        }
    }

    summaries
}
