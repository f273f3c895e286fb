//! Time source used for token expiry, backoff sleeps and run timestamps.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Wall-clock now, used for persisted timestamps and HTTP dates.
    fn utc_now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
///
/// Under `tokio::time::pause()` both `now` and `sleep` follow the paused
/// runtime clock, which is what the timing tests rely on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
