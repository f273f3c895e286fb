//! Retry budgets and backoff schedule for upstream requests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retry configuration for the API client.
///
/// Transient failures (network errors, 5xx) and HTTP 429 draw from separate
/// budgets so a rate-limit storm cannot exhaust the transient budget and
/// vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Retries after network errors or 5xx responses.
    pub max_retries: u32,
    /// Retries after HTTP 429.
    pub rate_limit_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound applied to a server-provided `Retry-After`.
    pub max_retry_after_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_retry_after_secs: 120,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with full jitter for the given zero-based retry.
    ///
    /// The delay is uniform in `[0, min(max_delay, base_delay * 2^retry)]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry);
        let millis = (ceiling.as_millis() as f64 * jitter_fraction()).round() as u64;
        Duration::from_millis(millis)
    }

    /// The upper bound of `backoff(retry)`.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Delay before retrying a 429: the server hint when present, else backoff.
    pub fn rate_limit_delay(&self, retry_after: Option<Duration>, retry: u32) -> Duration {
        match retry_after {
            Some(hint) => hint.min(Duration::from_secs(self.max_retry_after_secs)),
            None => self.backoff(retry),
        }
    }
}

/// Parses a `Retry-After` header value.
///
/// Accepts delta-seconds (`"2"`) or an HTTP-date. Dates in the past yield a
/// zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
        return None;
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Uniform random fraction in `[0, 1)`. Falls back to the full delay if the
/// system RNG is unavailable.
fn jitter_fraction() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 1.0;
    }
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}
