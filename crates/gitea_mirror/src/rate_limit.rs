//! Client-side request pacing for the Gitea API.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Requests per second used when none is configured.
///
/// Gitea has no global default; instances behind a reverse proxy commonly
/// throttle well below this.
pub const GITEA_DEFAULT_RPS: u32 = 5;

/// Shared token-bucket limiter. Clones share the same bucket.
///
/// ```ignore
/// let limiter = ApiRateLimiter::new(5);
/// limiter.wait().await;
/// client.migrate_repository(&request).await?;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
    rps: NonZeroU32,
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("rps", &self.rps)
            .finish()
    }
}

impl ApiRateLimiter {
    /// A limiter allowing `requests_per_second` (at least 1).
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            rps,
        }
    }

    pub fn requests_per_second(&self) -> u32 {
        self.rps.get()
    }

    /// Wait until a request may proceed.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }

    /// Take a request slot without waiting, if one is free.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }
}

impl Default for ApiRateLimiter {
    fn default() -> Self {
        Self::new(GITEA_DEFAULT_RPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rps_is_clamped_to_one() {
        let limiter = ApiRateLimiter::new(0);
        assert_eq!(limiter.requests_per_second(), 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn burst_matches_configured_rate() {
        let limiter = ApiRateLimiter::new(3);
        let allowed = (0..10).filter(|_| limiter.try_acquire()).count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn clones_share_a_bucket() {
        let a = ApiRateLimiter::new(1);
        let b = a.clone();
        assert!(a.try_acquire());
        assert!(!b.try_acquire());
    }

    #[tokio::test]
    async fn wait_returns_when_capacity_is_available() {
        let limiter = ApiRateLimiter::default();
        limiter.wait().await;
        assert_eq!(limiter.requests_per_second(), GITEA_DEFAULT_RPS);
    }
}
