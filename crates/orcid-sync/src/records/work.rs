use serde_json::{json, Value};

use super::{date_part, external_ids, i64_at, opt_str_at, str_at, Normalized};

/// Normalizes a `/{orcid}/work/{put-code}` document.
///
/// The first DOI and ISSN are kept as dedicated fields; every other
/// identifier is listed as `type:value`.
pub fn normalize_work(detail: &Value) -> Normalized {
    let mut doi = None;
    let mut issn = None;
    let mut others = Vec::new();
    for (id_type, id_value) in external_ids(detail) {
        match id_type.as_str() {
            "doi" if doi.is_none() => doi = Some(id_value),
            "issn" if issn.is_none() => issn = Some(id_value),
            _ => others.push(format!("{}:{}", id_type, id_value)),
        }
    }

    let payload = json!({
        "journalTitle": opt_str_at(detail, &["journal-title", "value"]),
        "month": date_part(detail, "publication-date", "month"),
        "day": date_part(detail, "publication-date", "day"),
        "doi": doi,
        "issn": issn,
        "otherExternalIds": others,
        "url": opt_str_at(detail, &["url", "value"]),
    });

    Normalized {
        title: str_at(detail, &["title", "title", "value"]),
        record_type: str_at(detail, &["type"]),
        year: date_part(detail, "publication-date", "year"),
        source_name: str_at(detail, &["source", "source-name", "value"]),
        visibility: str_at(detail, &["visibility"]),
        last_modified: i64_at(detail, &["last-modified-date", "value"]),
        payload,
    }
}
