//! Authenticated ORCID API client with retry and rate-limit handling.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::clock::Clock;

use super::error::{ApiError, Result};
use super::rate_limit::RateLimiter;
use super::retry::{parse_retry_after, RetryPolicy};
use super::token::TokenManager;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Maximum length of an upstream error body kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Joins a base URL and a relative path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn truncate_body(response: &HttpResponse) -> String {
    let text = response.text();
    if text.len() <= MAX_ERROR_BODY_LENGTH {
        return text;
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Outcome of one HTTP exchange, before the retry loop decides what to do.
enum Attempt {
    Done(Value),
    Retry { delay: Duration, reason: String },
    RetryRateLimited { delay: Duration },
    RefreshToken,
}

/// Retry bookkeeping for a single `fetch` call.
#[derive(Default)]
struct Budget {
    attempts: u32,
    transient_retries: u32,
    rate_limit_retries: u32,
    refreshed_token: bool,
}

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenManager>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            tokens,
            limiter,
            clock,
            retry,
            request_timeout,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Performs an authenticated GET and returns the parsed JSON body.
    ///
    /// Network errors and 5xx responses are retried with jittered backoff,
    /// 429 responses against a separate budget honoring `Retry-After`. A 401
    /// forces one token refresh; a second 401 is returned as `Fatal`.
    pub async fn fetch(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut budget = Budget::default();

        loop {
            budget.attempts += 1;
            let token = self.tokens.get_token().await?;

            let mut request = HttpRequest::get(url)
                .header("Accept", "application/json")
                .header("Authorization", token.bearer_header())
                .timeout(self.request_timeout);
            for (key, value) in params {
                request = request.query(*key, value.clone());
            }

            let sent = {
                let _permit = self.limiter.acquire().await?;
                self.transport.send(request).await
            };

            let attempt = match sent {
                Err(e) => self.transient_retry(&mut budget, url, e.to_string())?,
                Ok(response) => match self.classify(&mut budget, url, response) {
                    Err(ApiError::Unauthorized(_)) => self.reauthorize(&mut budget, url)?,
                    classified => classified?,
                },
            };

            match attempt {
                Attempt::Done(body) => return Ok(body),
                Attempt::Retry { delay, reason } => {
                    warn!(
                        "Retrying {} in {}ms after attempt {}: {}",
                        url,
                        delay.as_millis(),
                        budget.attempts,
                        reason
                    );
                    self.clock.sleep(delay).await;
                }
                Attempt::RetryRateLimited { delay } => {
                    warn!(
                        "Rate limited on {}, waiting {}ms (retry {}/{})",
                        url,
                        delay.as_millis(),
                        budget.rate_limit_retries,
                        self.retry.rate_limit_retries
                    );
                    self.clock.sleep(delay).await;
                }
                Attempt::RefreshToken => {
                    warn!("Token rejected for {}, forcing refresh", url);
                    self.tokens.invalidate(&token).await;
                }
            }
        }
    }

    fn classify(&self, budget: &mut Budget, url: &str, response: HttpResponse) -> Result<Attempt> {
        match response.status {
            status if (200..300).contains(&status) => {
                debug!("GET {} -> {}", url, status);
                let body = response.parse_json::<Value>().map_err(|e| {
                    ApiError::Fatal(format!("Malformed JSON response from {}: {}", url, e))
                })?;
                Ok(Attempt::Done(body))
            }
            401 => Err(ApiError::Unauthorized(url.to_string())),
            404 => Err(ApiError::NotFound(url.to_string())),
            429 => {
                if budget.rate_limit_retries >= self.retry.rate_limit_retries {
                    return Err(ApiError::RateLimited {
                        url: url.to_string(),
                        attempts: budget.attempts,
                    });
                }
                let hint = response
                    .header("retry-after")
                    .and_then(|v| parse_retry_after(v, self.clock.utc_now()));
                let delay = self
                    .retry
                    .rate_limit_delay(hint, budget.rate_limit_retries);
                budget.rate_limit_retries += 1;
                Ok(Attempt::RetryRateLimited { delay })
            }
            status if status >= 500 => self.transient_retry(
                budget,
                url,
                format!("HTTP {}: {}", status, truncate_body(&response)),
            ),
            status => Err(ApiError::Fatal(format!(
                "Unexpected HTTP {} from {}: {}",
                status,
                url,
                truncate_body(&response)
            ))),
        }
    }

    /// One forced refresh per request; a token rejected again is `Fatal`.
    fn reauthorize(&self, budget: &mut Budget, url: &str) -> Result<Attempt> {
        if budget.refreshed_token {
            return Err(ApiError::Fatal(format!(
                "{} rejected the token after a refresh",
                url
            )));
        }
        budget.refreshed_token = true;
        Ok(Attempt::RefreshToken)
    }

    fn transient_retry(&self, budget: &mut Budget, url: &str, reason: String) -> Result<Attempt> {
        if budget.transient_retries >= self.retry.max_retries {
            return Err(ApiError::Transient {
                url: url.to_string(),
                attempts: budget.attempts,
                message: reason,
            });
        }
        let delay = self.retry.backoff(budget.transient_retries);
        budget.transient_retries += 1;
        Ok(Attempt::Retry { delay, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::token::{ClientCredentials, TokenSettings, DEFAULT_SCOPE};
    use crate::api::transport::testing::{token_body, ScriptedTransport};
    use crate::api::transport::TransportError;
    use crate::api::ErrorKind;
    use crate::clock::SystemClock;
    use secrecy::SecretString;
    use serde_json::json;
    use tokio::time::Instant;

    const TOKEN_URL: &str = "https://orcid.test/oauth/token";
    const WORKS_URL: &str = "https://api.orcid.test/v3.0/0000-0001-2345-6789/works";

    fn client(transport: Arc<ScriptedTransport>) -> ApiClient {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tokens = Arc::new(TokenManager::new(
            transport.clone(),
            Arc::clone(&clock),
            ClientCredentials {
                token_url: TOKEN_URL.to_string(),
                client_id: "APP-123".to_string(),
                client_secret: SecretString::from("s3cret"),
                scope: DEFAULT_SCOPE.to_string(),
            },
            TokenSettings::default(),
        ));
        let limiter = Arc::new(RateLimiter::new(4, 0));
        ApiClient::new(
            transport,
            tokens,
            limiter,
            clock,
            RetryPolicy::default(),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.orcid.org/v3.0/", "/0000/works"),
            "https://api.orcid.org/v3.0/0000/works"
        );
        assert_eq!(join_url("https://x.test", "a"), "https://x.test/a");
    }

    #[tokio::test]
    async fn test_fetch_sends_bearer_and_params() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        transport.push_token(Ok(token_body("tok-1", 3600)));
        transport.push(Ok(HttpResponse::json(200, &json!({"group": []}))));
        let client = client(Arc::clone(&transport));

        let body = client
            .fetch(WORKS_URL, &[("start", "0".to_string())])
            .await
            .unwrap();
        assert_eq!(body, json!({"group": []}));

        let requests = transport.api_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header_value("authorization"), Some("Bearer tok-1"));
        assert_eq!(requests[0].header_value("accept"), Some("application/json"));
        assert_eq!(requests[0].query_param("start"), Some("0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_recovery_honors_retry_after() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        transport.push(Ok(HttpResponse::new(429, "").with_header("Retry-After", "1")));
        transport.push(Ok(HttpResponse::new(429, "").with_header("Retry-After", "1")));
        transport.push(Ok(HttpResponse::json(200, &json!({"ok": true}))));
        let client = client(Arc::clone(&transport));

        let start = Instant::now();
        let body = client.fetch(WORKS_URL, &[]).await.unwrap();
        assert_eq!(body["ok"], true);
        assert!(Instant::now() - start >= Duration::from_secs(2));
        assert_eq!(transport.api_requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_budget_exhausted() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        for _ in 0..3 {
            transport.push(Ok(HttpResponse::new(429, "").with_header("Retry-After", "1")));
        }
        let client = client(Arc::clone(&transport));

        let err = client.fetch(WORKS_URL, &[]).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::RateLimited {
                url: WORKS_URL.to_string(),
                attempts: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_then_succeed() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        transport.push(Err(TransportError::Timeout));
        transport.push(Ok(HttpResponse::new(503, "maintenance")));
        transport.push(Ok(HttpResponse::json(200, &json!({"ok": true}))));
        let client = client(Arc::clone(&transport));

        assert!(client.fetch(WORKS_URL, &[]).await.is_ok());
        assert_eq!(transport.api_requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_budget_exhausted() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        for _ in 0..4 {
            transport.push(Ok(HttpResponse::new(502, "bad gateway")));
        }
        let client = client(Arc::clone(&transport));

        match client.fetch(WORKS_URL, &[]).await.unwrap_err() {
            ApiError::Transient { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected transient error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        transport.push_token(Ok(token_body("tok-1", 3600)));
        transport.push_token(Ok(token_body("tok-2", 3600)));
        transport.push(Ok(HttpResponse::new(401, "")));
        transport.push(Ok(HttpResponse::json(200, &json!({"ok": true}))));
        let client = client(Arc::clone(&transport));

        assert!(client.fetch(WORKS_URL, &[]).await.is_ok());
        assert_eq!(transport.token_requests(), 2);
        let requests = transport.api_requests();
        assert_eq!(requests[1].header_value("authorization"), Some("Bearer tok-2"));
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        transport.push(Ok(HttpResponse::new(401, "")));
        transport.push(Ok(HttpResponse::new(401, "")));
        transport.push(Ok(HttpResponse::json(200, &json!({"ok": true}))));
        let client = client(Arc::clone(&transport));

        let err = client.fetch(WORKS_URL, &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Fatal(_)));
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!err.is_token_failure());
        assert_eq!(transport.api_requests().len(), 2);
        assert_eq!(transport.token_requests(), 2);
    }

    #[tokio::test]
    async fn test_not_found_and_unexpected_status() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        transport.push(Ok(HttpResponse::new(404, "")));
        transport.push(Ok(HttpResponse::new(400, "bad request")));
        let client = client(Arc::clone(&transport));

        assert_eq!(
            client.fetch(WORKS_URL, &[]).await.unwrap_err(),
            ApiError::NotFound(WORKS_URL.to_string())
        );
        let err = client.fetch(WORKS_URL, &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Fatal(ref msg) if msg.contains("400")));
        assert_eq!(transport.api_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_body_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        transport.push(Ok(HttpResponse::new(200, "<html>oops</html>")));
        let client = client(transport);

        let err = client.fetch(WORKS_URL, &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_token_failure_propagates() {
        let transport = Arc::new(ScriptedTransport::new(TOKEN_URL));
        transport.push_token(Ok(HttpResponse::new(401, "invalid_client")));
        let client = client(Arc::clone(&transport));

        let err = client.fetch(WORKS_URL, &[]).await.unwrap_err();
        assert!(err.is_token_failure());
        assert!(transport.api_requests().is_empty());
    }
}
