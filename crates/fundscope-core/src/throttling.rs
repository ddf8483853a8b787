use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::source_policy::SourcePolicy;
use crate::SourceId;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Paces outbound calls to one source: at most one request per
/// `min_interval`, regardless of how many funds are in flight.
#[derive(Clone)]
pub struct SourceThrottle {
    source: SourceId,
    limiter: Arc<DirectRateLimiter>,
}

impl SourceThrottle {
    pub fn new(source: SourceId, min_interval: Duration) -> Self {
        Self {
            source,
            limiter: Arc::new(RateLimiter::direct(quota_from_interval(min_interval))),
        }
    }

    pub fn from_policy(policy: &SourcePolicy) -> Self {
        Self::new(policy.source, policy.min_interval)
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Waits until the next request slot is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Non-blocking check, `true` when a slot was consumed.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for SourceThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceThrottle").field("source", &self.source).finish()
    }
}

/// Hands out one shared throttle per source.
#[derive(Debug, Clone, Default)]
pub struct ThrottleRegistry {
    throttles: Arc<Mutex<HashMap<SourceId, SourceThrottle>>>,
}

impl ThrottleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the throttle for `policy.source`, creating it on first use.
    /// Later policies for the same source reuse the first limiter.
    pub fn for_policy(&self, policy: &SourcePolicy) -> SourceThrottle {
        match self.throttles.lock() {
            Ok(mut throttles) => throttles
                .entry(policy.source)
                .or_insert_with(|| SourceThrottle::from_policy(policy))
                .clone(),
            Err(_) => SourceThrottle::from_policy(policy),
        }
    }
}

fn quota_from_interval(min_interval: Duration) -> Quota {
    let period = min_interval.max(Duration::from_millis(1));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn second_call_inside_interval_is_refused() {
        let throttle = SourceThrottle::new(SourceId::Nport, Duration::from_secs(60));

        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
    }

    #[tokio::test]
    async fn acquire_spaces_consecutive_calls() {
        let throttle = SourceThrottle::new(SourceId::Bdif, Duration::from_millis(40));
        let started = Instant::now();

        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;

        assert!(started.elapsed() >= Duration::from_millis(70));
    }

    #[test]
    fn registry_shares_one_throttle_per_source() {
        let registry = ThrottleRegistry::new();
        let policy = SourcePolicy {
            min_interval: Duration::from_secs(60),
            ..SourcePolicy::nport_default()
        };

        let first = registry.for_policy(&policy);
        let second = registry.for_policy(&policy);

        assert!(first.try_acquire());
        assert!(!second.try_acquire(), "clones must share the same budget");
    }
}
