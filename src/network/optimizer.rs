//! Network request optimizer
//!
//! One instance per composition root, shared by cloning. Combines the
//! response cache, the batch queue, network-adaptive request options and
//! throttled prefetching.

use super::batch::{BatchJob, BatchQueue};
use super::cache::ResponseCache;
use super::conditions::{adapt_request, NetworkConditions, RequestOptions};
use super::rate_limit::PrefetchLimiter;
use crate::config::OptimizerConfig;
use crate::recovery::FetchError;
use crate::types::lock;
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// Prefetching
// ============================================================================

/// Decides when and what to prefetch
pub trait PrefetchStrategy: Send + Sync {
    /// Whether prefetching should happen now
    fn trigger_condition(&self) -> bool;

    /// Request options for the content to prefetch
    fn targets(&self) -> Vec<RequestOptions>;

    /// Extra wait before prefetching; the configured delay applies when `None`
    fn delay(&self) -> Option<Duration> {
        None
    }
}

/// Fetches content for prefetch targets
#[async_trait]
pub trait PrefetchProvider<V>: Send + Sync {
    async fn fetch(&self, target: &RequestOptions) -> Result<V, FetchError>;
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    dropped: AtomicU64,
    prefetched: AtomicU64,
}

/// Snapshot of optimizer activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizerStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Entries removed by LRU or expiry to make room
    pub evictions: u64,
    pub batches_flushed: u64,
    /// Low-priority requests skipped on a constrained link
    pub dropped_requests: u64,
    pub prefetches: u64,
    pub cache_size: usize,
}

// ============================================================================
// Optimizer
// ============================================================================

/// Batching, caching, prefetching and timeout adaptation for one feed
pub struct NetworkRequestOptimizer<V> {
    config: OptimizerConfig,
    cache: Arc<Mutex<ResponseCache<V>>>,
    batch: Arc<BatchQueue<V>>,
    conditions: Arc<Mutex<NetworkConditions>>,
    limiter: PrefetchLimiter,
    counters: Arc<Counters>,
}

impl<V> NetworkRequestOptimizer<V>
where
    V: Clone + Send + 'static,
{
    /// Create an optimizer
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            cache: Arc::new(Mutex::new(ResponseCache::new(
                config.cache_ttl(),
                config.cache_max_size,
            ))),
            batch: Arc::new(BatchQueue::new(
                config.batch_size,
                config.batch_timeout(),
                config.max_concurrent_requests,
            )),
            conditions: Arc::new(Mutex::new(NetworkConditions::default())),
            limiter: PrefetchLimiter::new(config.prefetch_per_second),
            counters: Arc::new(Counters::default()),
            config,
        }
    }

    /// The configuration in use
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    // ========================================================================
    // Batching
    // ========================================================================

    /// Run `request`, batched with others when batching is enabled
    pub async fn batch_request<F, Fut>(&self, request: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        if !self.config.batching_enabled {
            return request().await;
        }
        let job: BatchJob<V> = Box::pin(request());
        self.batch.submit(job).await
    }

    /// Flush queued requests now
    pub async fn flush(&self) {
        self.batch.flush().await;
    }

    /// Requests waiting for the next flush
    pub fn pending_requests(&self) -> usize {
        self.batch.pending()
    }

    // ========================================================================
    // Caching
    // ========================================================================

    /// Store a response under `key` with invalidation `tags`
    pub fn cache_response<I, S>(&self, key: impl Into<String>, data: V, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let outcome = lock(&self.cache).insert(key.clone(), data, tags);
        let removed = outcome.expired as u64 + u64::from(outcome.evicted.is_some());
        if removed > 0 {
            self.counters.evictions.fetch_add(removed, Ordering::Relaxed);
        }
        debug!(key = %key, evicted = ?outcome.evicted, "Cached response");
    }

    /// Read a live cached response
    pub fn get_cached_response(&self, key: &str) -> Option<V> {
        let value = lock(&self.cache).get(key);
        let counter = if value.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Whether a live entry exists, without counting a hit or miss
    pub fn is_cached(&self, key: &str) -> bool {
        lock(&self.cache).contains(key)
    }

    /// Remove every entry carrying any of `tags`; returns how many
    pub fn invalidate_cache<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let removed = lock(&self.cache).invalidate_tags(tags);
        info!(removed, "Invalidated cache entries");
        removed
    }

    /// Drop every cache entry
    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    /// Entries currently stored
    pub fn cache_len(&self) -> usize {
        lock(&self.cache).len()
    }

    // ========================================================================
    // Network Conditions
    // ========================================================================

    /// Fold a measured response time into the smoothed RTT
    pub fn record_response_time(&self, elapsed: Duration) {
        lock(&self.conditions).record_rtt(elapsed);
    }

    /// Replace the reported link properties, keeping the measured RTT
    pub fn set_network_conditions(&self, conditions: NetworkConditions) {
        let mut current = lock(&self.conditions);
        let rtt = current.rtt;
        *current = NetworkConditions {
            rtt: conditions.rtt.or(rtt),
            ..conditions
        };
    }

    /// Current conditions
    pub fn network_conditions(&self) -> NetworkConditions {
        lock(&self.conditions).clone()
    }

    /// Adapt `options` to the current conditions; `None` means skip it
    pub fn adapt_request_to_network(&self, options: RequestOptions) -> Option<RequestOptions> {
        let conditions = self.network_conditions();
        let key = options.key.clone();
        let adapted = adapt_request(options, &conditions, &self.config);
        if adapted.is_none() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Dropped low-priority request on constrained network");
        }
        adapted
    }

    // ========================================================================
    // Prefetching
    // ========================================================================

    /// Prefetch the strategy's targets in the background
    ///
    /// Nothing happens unless prefetching is enabled and the trigger holds.
    /// Targets already cached, dropped by adaptation or over the rate limit
    /// are skipped. Returns the handle of the background task.
    pub fn prefetch_content<S, P>(
        &self,
        strategy: &S,
        provider: Arc<P>,
    ) -> Option<tokio::task::JoinHandle<usize>>
    where
        S: PrefetchStrategy + ?Sized,
        P: PrefetchProvider<V> + ?Sized + 'static,
    {
        if !self.config.prefetch_enabled || !strategy.trigger_condition() {
            return None;
        }

        let targets: Vec<RequestOptions> = strategy
            .targets()
            .into_iter()
            .filter(|t| !self.is_cached(&t.key))
            .filter_map(|t| self.adapt_request_to_network(t))
            .collect();
        if targets.is_empty() {
            return None;
        }

        let delay = strategy
            .delay()
            .unwrap_or(Duration::from_millis(self.config.prefetch_delay_ms));
        let optimizer = self.clone();

        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut fetched = 0;
            for target in targets {
                if optimizer.is_cached(&target.key) {
                    continue;
                }
                if !optimizer.limiter.try_acquire() {
                    debug!(key = %target.key, "Prefetch throttled");
                    continue;
                }
                match provider.fetch(&target).await {
                    Ok(data) => {
                        optimizer.cache_response(target.key.clone(), data, target.tags.clone());
                        optimizer.counters.prefetched.fetch_add(1, Ordering::Relaxed);
                        fetched += 1;
                    }
                    Err(e) => debug!(key = %target.key, error = %e, "Prefetch failed"),
                }
            }
            fetched
        }))
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// Activity counters
    pub fn stats(&self) -> OptimizerStats {
        OptimizerStats {
            cache_hits: self.counters.hits.load(Ordering::Relaxed),
            cache_misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            batches_flushed: self.batch.batches_flushed(),
            dropped_requests: self.counters.dropped.load(Ordering::Relaxed),
            prefetches: self.counters.prefetched.load(Ordering::Relaxed),
            cache_size: self.cache_len(),
        }
    }
}

impl<V> Clone for NetworkRequestOptimizer<V> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            batch: Arc::clone(&self.batch),
            conditions: Arc::clone(&self.conditions),
            limiter: self.limiter.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<V> Default for NetworkRequestOptimizer<V>
where
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl<V> std::fmt::Debug for NetworkRequestOptimizer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRequestOptimizer")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
