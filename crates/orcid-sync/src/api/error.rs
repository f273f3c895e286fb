//! ORCID API client error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse error category reported to callers and stored in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    RateLimited,
    NotFound,
    Transient,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the token manager and the API client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The API rejected the bearer token. The client refreshes once; a
    /// second rejection of the same request is `Fatal`.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 429 persisted past the rate-limit retry budget.
    #[error("Rate limited by upstream after {attempts} attempts: {url}")]
    RateLimited { url: String, attempts: u32 },

    /// The resource does not exist or is not visible.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network errors or 5xx responses persisted past the retry budget.
    #[error("Transient failure after {attempts} attempts for {url}: {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable failure: unexpected 4xx, malformed body, repeated 401.
    #[error("Fatal API error: {0}")]
    Fatal(String),

    /// The OAuth2 client-credentials exchange failed.
    #[error("OAuth2 token request failed: {0}")]
    Token(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Transient { .. } => ErrorKind::Transient,
            ApiError::Fatal(_) | ApiError::Token(_) => ErrorKind::Fatal,
        }
    }

    /// No request can succeed without a token, so callers abort the whole
    /// invocation on this error instead of recording it per researcher.
    pub fn is_token_failure(&self) -> bool {
        matches!(self, ApiError::Token(_))
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
