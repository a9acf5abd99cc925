//! Prefetch throttling
//!
//! Token bucket (governor) that caps speculative traffic so prefetches
//! never crowd out foreground loads.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Token bucket limiter for prefetch requests
#[derive(Clone)]
pub struct PrefetchLimiter {
    limiter: Arc<Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
    per_second: u32,
}

impl PrefetchLimiter {
    /// Allow `per_second` prefetches per second, with an equal burst
    pub fn new(per_second: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(Governor::direct(Quota::per_second(rate).allow_burst(rate))),
            per_second: rate.get(),
        }
    }

    /// Take a permit if one is available, without waiting
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Configured rate
    pub fn per_second(&self) -> u32 {
        self.per_second
    }
}

impl std::fmt::Debug for PrefetchLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchLimiter")
            .field("per_second", &self.per_second)
            .finish()
    }
}
