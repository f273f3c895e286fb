use std::path::{Path, PathBuf};

use secrecy::SecretString;

use super::schema::SyncConfig;
use super::ConfigError;
use crate::api::{ClientCredentials, TokenSettings};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV_VAR: &str = "ORCID_SYNC_CONFIG";

/// `~/.orcid-sync/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".orcid-sync").join("config.yaml"))
}

/// Picks the config file: explicit path, then `ORCID_SYNC_CONFIG`, then the default.
///
/// Returns the path and whether it was asked for explicitly.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<(PathBuf, bool), ConfigError> {
    if let Some(path) = explicit {
        return Ok((path.to_path_buf(), true));
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        return Ok((PathBuf::from(path), true));
    }
    default_config_path()
        .map(|p| (p, false))
        .ok_or(ConfigError::NoHomeDirectory)
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_config_from_str(&content)
}

/// Loads the config for the CLI. A missing default file yields the defaults;
/// a missing explicitly requested file is an error.
pub fn load_or_default(explicit: Option<&Path>) -> Result<SyncConfig, ConfigError> {
    let (path, required) = resolve_config_path(explicit)?;
    if !required && !path.exists() {
        log::info!(
            "No config file at {}, using defaults",
            path.display()
        );
        let config = SyncConfig::default();
        validate_config(&config)?;
        return Ok(config);
    }
    log::info!("Loading config from {}", path.display());
    load_config(&path)
}

pub fn load_config_from_str(content: &str) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = if content.trim().is_empty() {
        SyncConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };
    validate_config(&config)?;
    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(invalid(format!(
            "orcid.{} must be an http(s) URL, got '{}'",
            name, value
        )))
    }
}

fn validate_config(config: &SyncConfig) -> Result<(), ConfigError> {
    let orcid = &config.orcid;
    validate_url("memberUrl", &orcid.member_url)?;
    validate_url("searchUrl", &orcid.search_url)?;
    validate_url("tokenUrl", &orcid.token_url)?;
    validate_url("rorUrl", &orcid.ror_url)?;

    if orcid.search_page_size == 0 {
        return Err(invalid("orcid.searchPageSize must be > 0"));
    }
    if config.http.max_in_flight == 0 {
        return Err(invalid("http.maxInFlight must be > 0"));
    }
    if config.http.request_timeout_secs == 0 {
        return Err(invalid("http.requestTimeoutSecs must be > 0"));
    }
    if config.http.retry.max_delay_ms < config.http.retry.base_delay_ms {
        return Err(invalid("http.retry.maxDelayMs must be >= baseDelayMs"));
    }
    if config.scheduler.concurrency == 0 {
        return Err(invalid("scheduler.concurrency must be > 0"));
    }
    if config.scheduler.stale_run_secs == 0 {
        return Err(invalid("scheduler.staleRunSecs must be > 0"));
    }
    Ok(())
}

impl SyncConfig {
    /// Client credentials with the secret resolved. Requires `orcid.clientId`.
    pub fn credentials(&self) -> Result<ClientCredentials, ConfigError> {
        let client_id = self.orcid.client_id.trim();
        if client_id.is_empty() {
            return Err(invalid("orcid.clientId is required for API access"));
        }
        let client_secret: SecretString = self.orcid.client_secret.resolve("ORCID client secret")?;
        Ok(ClientCredentials {
            token_url: self.orcid.token_url.clone(),
            client_id: client_id.to_string(),
            client_secret,
            scope: self.orcid.scope.clone(),
        })
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            safety_margin: std::time::Duration::from_secs(self.http.token_safety_margin_secs),
            default_lifetime: std::time::Duration::from_secs(
                self.http.token_default_lifetime_secs,
            ),
            request_timeout: self.http.request_timeout(),
        }
    }
}
