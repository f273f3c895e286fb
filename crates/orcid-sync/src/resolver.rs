//! Enumerates the researchers affiliated with an institution.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};
use serde::Deserialize;

use crate::api::{join_url, ApiClient, ApiError};
use crate::model::normalize_ror;

/// Default number of rows requested per search page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Deepest row the ORCID search index will return for one query.
pub const DEFAULT_MAX_RESULTS: usize = 10_000;

#[derive(Debug, Default, Deserialize)]
struct SearchPage {
    #[serde(rename = "num-found", default)]
    num_found: usize,

    #[serde(rename = "expanded-result", default)]
    expanded_result: Option<Vec<SearchRow>>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchRow {
    #[serde(rename = "orcid-id", default)]
    orcid_id: Option<String>,
}

/// Builds the affiliation query for an institution.
pub fn affiliation_query(ror: &str, grid: Option<&str>) -> String {
    let mut query = format!("ror-org-id:\"https://ror.org/{}\"", normalize_ror(ror));
    if let Some(grid) = grid.filter(|g| !g.trim().is_empty()) {
        query.push_str(&format!(" OR grid-org-id:\"{}\"", grid.trim()));
    }
    query
}

pub struct InstitutionResolver {
    client: Arc<ApiClient>,
    search_url: String,
    page_size: usize,
    max_results: usize,
}

impl InstitutionResolver {
    pub fn new(client: Arc<ApiClient>, search_url: impl Into<String>) -> Self {
        Self {
            client,
            search_url: search_url.into(),
            page_size: DEFAULT_PAGE_SIZE,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Returns the ORCID iDs affiliated with `ror`, deduplicated in first-seen order.
    pub async fn resolve_identities(&self, ror: &str) -> Result<Vec<String>, ApiError> {
        self.resolve_with_grid(ror, None).await
    }

    /// Like `resolve_identities`, also matching affiliations recorded by GRID id.
    pub async fn resolve_with_grid(
        &self,
        ror: &str,
        grid: Option<&str>,
    ) -> Result<Vec<String>, ApiError> {
        let url = join_url(&self.search_url, "expanded-search/");
        let query = affiliation_query(ror, grid);

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut start = 0usize;
        let mut limit = self.max_results;

        loop {
            let rows = self.page_size.min(limit.saturating_sub(start));
            if rows == 0 {
                break;
            }

            let body = self
                .client
                .fetch(
                    &url,
                    &[
                        ("q", query.clone()),
                        ("start", start.to_string()),
                        ("rows", rows.to_string()),
                    ],
                )
                .await?;
            let page: SearchPage = serde_json::from_value(body).map_err(|e| {
                ApiError::Fatal(format!("Malformed search response for {}: {}", ror, e))
            })?;

            if start == 0 {
                limit = page.num_found.min(self.max_results);
                debug!("Search for {} reports {} researchers", ror, page.num_found);
            }

            let results = page.expanded_result.unwrap_or_default();
            let received = results.len();
            for row in results {
                if let Some(id) = row.orcid_id.map(|s| s.trim().to_string()) {
                    if !id.is_empty() && seen.insert(id.clone()) {
                        ids.push(id);
                    }
                }
            }

            start += received;
            if received < rows {
                break;
            }
        }

        info!("Resolved {} researchers for {}", ids.len(), ror);
        Ok(ids)
    }
}
