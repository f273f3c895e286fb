//! GRID identifier lookup in the public ROR registry.
//!
//! ORCID affiliations recorded before ROR adoption only carry a GRID id, so
//! the resolver queries both. ROR is public and unauthenticated; requests go
//! straight through the transport without the ORCID token or rate limiter.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::api::{join_url, ApiError, HttpRequest, HttpTransport};
use crate::model::normalize_ror;

/// Default ROR organizations endpoint.
pub const DEFAULT_ROR_URL: &str = "https://api.ror.org/organizations";

pub struct RorClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    timeout: Duration,
}

impl RorClient {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Returns the GRID id the registry lists for `ror`, if any.
    ///
    /// An unknown ROR id yields `Ok(None)`.
    pub async fn fetch_grid_id(&self, ror: &str) -> Result<Option<String>, ApiError> {
        let url = join_url(&self.base_url, &normalize_ror(ror));
        let request = HttpRequest::get(&url)
            .header("Accept", "application/json")
            .timeout(self.timeout);

        let response = self.transport.send(request).await.map_err(|e| ApiError::Transient {
            url: url.clone(),
            attempts: 1,
            message: e.to_string(),
        })?;

        match response.status {
            404 => {
                debug!("ROR registry has no record for {}", ror);
                Ok(None)
            }
            _ if response.is_success() => {
                let body: Value = response.parse_json().map_err(|e| {
                    ApiError::Fatal(format!("Malformed ROR response from {}: {}", url, e))
                })?;
                Ok(extract_grid_id(&body))
            }
            status if status >= 500 => {
                warn!("ROR registry returned {} for {}", status, ror);
                Err(ApiError::Transient {
                    url,
                    attempts: 1,
                    message: format!("HTTP {}", status),
                })
            }
            status => Err(ApiError::Fatal(format!(
                "Unexpected HTTP {} from {}",
                status, url
            ))),
        }
    }
}

/// Extracts the preferred GRID id from a ROR organization record.
///
/// Schema v2 lists `external_ids` as `[{type, preferred, all}]`; schema v1
/// keys them by type (`{"GRID": {preferred, all}}`).
pub fn extract_grid_id(body: &Value) -> Option<String> {
    let pick = |entry: &Value| -> Option<String> {
        entry
            .get("preferred")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| match entry.get("all") {
                Some(Value::Array(all)) => all.first().and_then(Value::as_str),
                Some(Value::String(s)) => Some(s.as_str()),
                _ => None,
            })
            .map(str::to_string)
    };

    match body.get("external_ids")? {
        Value::Array(ids) => ids
            .iter()
            .find(|e| {
                e.get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.eq_ignore_ascii_case("grid"))
            })
            .and_then(pick),
        Value::Object(ids) => ids
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("grid"))
            .and_then(|(_, v)| pick(v)),
        _ => None,
    }
}
