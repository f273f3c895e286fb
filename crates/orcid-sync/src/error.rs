use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::db::DatabaseError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Invalid rebuild options: {0}")]
    InvalidOptions(String),

    #[error("Unknown institution: {0}")]
    UnknownInstitution(String),

    /// Researcher enumeration for an institution failed.
    #[error("Resolving researchers for {ror} failed: {source}")]
    ResolverFailed {
        ror: String,
        #[source]
        source: ApiError,
    },

    /// Fetching one researcher's records failed.
    #[error("Building records for {researcher_id} failed: {source}")]
    ResearcherFailed {
        researcher_id: String,
        #[source]
        source: ApiError,
    },
}

impl SyncError {
    /// Whether this error stems from the OAuth2 token exchange.
    pub fn is_token_failure(&self) -> bool {
        match self {
            SyncError::Api(e)
            | SyncError::ResolverFailed { source: e, .. }
            | SyncError::ResearcherFailed { source: e, .. } => e.is_token_failure(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
