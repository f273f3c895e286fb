//! OAuth2 client-credentials token management for the ORCID API.
//!
//! The token is shared by every worker. Refreshes are coalesced: the cache
//! lock is held across the token request, so callers arriving during a
//! refresh wait for it and then reuse its result instead of issuing their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::clock::Clock;

use super::error::{ApiError, Result};
use super::transport::{HttpRequest, HttpTransport};

/// Maximum length for sanitized error bodies to prevent log flooding.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Maximum expires_in value we accept (1 year in seconds).
const MAX_EXPIRES_IN_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Default scope for reading public ORCID data.
pub const DEFAULT_SCOPE: &str = "/read-public";

/// Truncates an OAuth error response body so token material never floods logs.
fn sanitize_oauth_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

/// Client credentials registered with ORCID.
pub struct ClientCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scope: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token lifetime settings.
#[derive(Debug, Clone, Copy)]
pub struct TokenSettings {
    /// Tokens expiring within this margin are refreshed before use.
    pub safety_margin: Duration,
    /// Lifetime assumed when the token response omits `expires_in`.
    pub default_lifetime: Duration,
    pub request_timeout: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(60),
            default_lifetime: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,

    #[serde(default)]
    expires_in: Option<u64>,
}

/// A bearer token with its monotonic expiry.
pub struct AccessToken {
    secret: SecretString,
    expires_at: Instant,
}

impl AccessToken {
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Value for the `Authorization` header.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.secret.expose_secret())
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct TokenManager {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    credentials: ClientCredentials,
    settings: TokenSettings,
    cached: Mutex<Option<Arc<AccessToken>>>,
    refreshes: AtomicU64,
}

impl TokenManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        credentials: ClientCredentials,
        settings: TokenSettings,
    ) -> Self {
        Self {
            transport,
            clock,
            credentials,
            settings,
            cached: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Returns a token with more than the safety margin of lifetime left,
    /// requesting a new one if needed.
    pub async fn get_token(&self) -> Result<Arc<AccessToken>> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if self.is_fresh(token) {
                return Ok(Arc::clone(token));
            }
            debug!("Cached ORCID token is within the safety margin, refreshing");
        }

        // Discard the stale token first so a failed refresh leaves nothing behind.
        *cached = None;

        let token = Arc::new(self.request_token().await?);
        *cached = Some(Arc::clone(&token));
        Ok(token)
    }

    /// Drops the cached token if it is still the one the caller used.
    ///
    /// Two workers hitting 401 with the same token cause one refresh, not two.
    pub async fn invalidate(&self, seen: &Arc<AccessToken>) {
        let mut cached = self.cached.lock().await;
        if cached.as_ref().is_some_and(|c| Arc::ptr_eq(c, seen)) {
            warn!("Invalidating rejected ORCID token");
            *cached = None;
        }
    }

    /// The API client these tokens are issued to.
    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    /// Number of token requests issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    fn is_fresh(&self, token: &AccessToken) -> bool {
        token.expires_at > self.clock.now() + self.settings.safety_margin
    }

    async fn request_token(&self) -> Result<AccessToken> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(
            "Requesting ORCID client-credentials token from {}",
            self.credentials.token_url
        );

        let request = HttpRequest::post(&self.credentials.token_url)
            .header("Accept", "application/json")
            .form_field("client_id", &self.credentials.client_id)
            .form_field(
                "client_secret",
                self.credentials.client_secret.expose_secret(),
            )
            .form_field("grant_type", "client_credentials")
            .form_field("scope", &self.credentials.scope)
            .timeout(self.settings.request_timeout);

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| ApiError::Token(format!("Token request failed: {}", e)))?;

        if !response.is_success() {
            return Err(ApiError::Token(format!(
                "Token request failed ({}): {}",
                response.status,
                sanitize_oauth_error_body(&response.text())
            )));
        }

        let body: TokenResponse = response
            .parse_json()
            .map_err(|e| ApiError::Token(format!("Failed to parse token response: {}", e)))?;

        if body.access_token.trim().is_empty() {
            return Err(ApiError::Token(
                "Token response did not contain an access_token".to_string(),
            ));
        }

        let lifetime = body
            .expires_in
            .map(|secs| Duration::from_secs(secs.min(MAX_EXPIRES_IN_SECONDS)))
            .unwrap_or(self.settings.default_lifetime);

        info!("Obtained ORCID access token (expires in {}s)", lifetime.as_secs());

        Ok(AccessToken {
            secret: SecretString::from(body.access_token),
            expires_at: self.clock.now() + lifetime,
        })
    }
}
