//! Process-wide limiter for outbound ORCID requests.
//!
//! Bounds both the number of requests in flight and the rate at which new
//! requests start. It is shared by every worker regardless of pool size,
//! because the upstream quota is global to the client credentials.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::ApiError;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Held for the duration of one HTTP exchange.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

pub struct RateLimiter {
    permits: Arc<Semaphore>,
    pacer: Option<DirectRateLimiter>,
    min_interval: Duration,
}

impl RateLimiter {
    /// Creates a limiter. `requests_per_second == 0` disables start spacing.
    ///
    /// # Panics
    /// Panics if `max_in_flight` is 0.
    pub fn new(max_in_flight: usize, requests_per_second: u32) -> Self {
        assert!(max_in_flight > 0, "max_in_flight must be > 0");
        // A burst of one spreads starts evenly instead of front-loading them.
        let quota = NonZeroU32::new(requests_per_second)
            .map(|rps| Quota::per_second(rps).allow_burst(NonZeroU32::MIN));
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            min_interval: quota
                .map(|q| q.replenish_interval())
                .unwrap_or(Duration::ZERO),
            pacer: quota.map(DirectRateLimiter::direct),
        }
    }

    /// Waits for an in-flight slot and for the next free start time.
    pub async fn acquire(&self) -> Result<RatePermit, ApiError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ApiError::Fatal("Rate limiter closed".to_string()))?;

        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }

        Ok(RatePermit { _permit: permit })
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
