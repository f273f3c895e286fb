use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::api::RetryPolicy;
use crate::secrets::{expand_home_path, SecretSource};

/// Environment variable read for the client secret when the config names no source.
pub const DEFAULT_SECRET_ENV_VAR: &str = "ORCID_CLIENT_SECRET";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub orcid: OrcidConfig,
    pub http: HttpConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrcidConfig {
    pub member_url: String,
    pub search_url: String,
    pub token_url: String,
    pub ror_url: String,
    pub client_id: String,
    pub client_secret: SecretSource,
    pub scope: String,
    pub search_page_size: usize,
    pub search_max_results: usize,
}

impl Default for OrcidConfig {
    fn default() -> Self {
        Self {
            member_url: "https://api.orcid.org/v3.0/".to_string(),
            search_url: "https://pub.orcid.org/v3.0/".to_string(),
            token_url: "https://orcid.org/oauth/token".to_string(),
            ror_url: crate::ror::DEFAULT_ROR_URL.to_string(),
            client_id: String::new(),
            client_secret: SecretSource::from_env_var(DEFAULT_SECRET_ENV_VAR),
            scope: crate::api::DEFAULT_SCOPE.to_string(),
            search_page_size: crate::resolver::DEFAULT_PAGE_SIZE,
            search_max_results: crate::resolver::DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub token_safety_margin_secs: u64,
    /// Assumed token lifetime when the token response has no `expires_in`.
    pub token_default_lifetime_secs: u64,
    pub max_in_flight: usize,
    /// 0 disables start spacing.
    pub requests_per_second: u32,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            token_safety_margin_secs: 60,
            token_default_lifetime_secs: 3600,
            max_in_flight: 8,
            requests_per_second: 24,
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Default worker count for rebuilds.
    pub concurrency: usize,
    /// A running run whose heartbeat is older than this is taken over.
    pub stale_run_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            stale_run_secs: crate::runs::DEFAULT_STALE_AFTER.as_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_run_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    /// Defaults to `~/.orcid-sync/data/orcid-sync.db`.
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Some(expand_home_path(path)),
            None => crate::db::default_database_path(),
        }
    }
}
