use serde_json::{json, Value};

use super::{date_part, external_ids, i64_at, opt_str_at, str_at, Normalized};

/// Normalizes a `/{orcid}/funding/{put-code}` document.
///
/// The record year is the start year. The grant number is the first external
/// id whose type mentions "grant".
pub fn normalize_funding(detail: &Value) -> Normalized {
    let grant_number = external_ids(detail)
        .into_iter()
        .find(|(id_type, _)| id_type.contains("grant"))
        .map(|(_, value)| value);

    let payload = json!({
        "organization": {
            "name": opt_str_at(detail, &["organization", "name"]),
            "city": opt_str_at(detail, &["organization", "address", "city"]),
            "country": opt_str_at(detail, &["organization", "address", "country"]),
        },
        "start": {
            "year": date_part(detail, "start-date", "year"),
            "month": date_part(detail, "start-date", "month"),
            "day": date_part(detail, "start-date", "day"),
        },
        "end": {
            "year": date_part(detail, "end-date", "year"),
            "month": date_part(detail, "end-date", "month"),
            "day": date_part(detail, "end-date", "day"),
        },
        "grantNumber": grant_number,
        "amount": opt_str_at(detail, &["amount", "value"]),
        "currency": opt_str_at(detail, &["amount", "currency-code"]),
        "url": opt_str_at(detail, &["url", "value"]),
    });

    Normalized {
        title: str_at(detail, &["title", "title", "value"]),
        record_type: str_at(detail, &["type"]),
        year: date_part(detail, "start-date", "year"),
        source_name: str_at(detail, &["source", "source-name", "value"]),
        visibility: str_at(detail, &["visibility"]),
        last_modified: i64_at(detail, &["last-modified-date", "value"]),
        payload,
    }
}
