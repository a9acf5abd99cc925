//! Network request optimization
//!
//! This module provides:
//! - A TTL + LRU response cache with tag invalidation
//! - Size- and time-triggered request batching with a concurrency cap
//! - Timeout adaptation to measured round-trip time
//! - Throttled background prefetching

mod batch;
mod cache;
mod conditions;
mod optimizer;
mod rate_limit;


pub use batch::{BatchJob, BatchQueue};
pub use cache::{CacheEntry, InsertOutcome, ResponseCache};
pub use conditions::{
    adapt_request, EffectiveType, NetworkConditions, RequestOptions, RequestPriority,
};
pub use optimizer::{
    NetworkRequestOptimizer, OptimizerStats, PrefetchProvider, PrefetchStrategy,
};
pub use rate_limit::PrefetchLimiter;
