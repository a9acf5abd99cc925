//! Configuration types for the feed core
//!
//! Every section can be loaded from YAML (or JSON, which is valid YAML) and
//! every field has a default, so an empty document is a valid config.

use crate::error::{Error, Result, ResultExt};
use crate::recovery::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete feed configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Page sizing
    #[serde(default)]
    pub pagination: PaginationSettings,

    /// Retry backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Recovery strategy table
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Error history
    #[serde(default)]
    pub reporter: ReporterConfig,

    /// Batching, caching, prefetching and network adaptation
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl FeedConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        if self.pagination.items_per_page == 0 {
            return Err(Error::invalid_value(
                "pagination.items_per_page",
                "must be at least 1",
            ));
        }
        self.retry.validate()?;
        self.recovery.validate()?;
        self.reporter.validate()?;
        self.optimizer.validate()
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Page sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationSettings {
    /// Items shown per page
    #[serde(default = "default_items_per_page")]
    pub items_per_page: usize,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
        }
    }
}

fn default_items_per_page() -> usize {
    15
}

// ============================================================================
// Retry
// ============================================================================

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for any delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Perturb delays by up to ±25%
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Error codes eligible for retry
    #[serde(default = "ErrorKind::default_retryable_set")]
    pub retryable_errors: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
            retryable_errors: ErrorKind::default_retryable_set(),
        }
    }
}

impl RetryConfig {
    /// Disable jitter (deterministic delays)
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Base delay as a duration
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum delay as a duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_value(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::invalid_value(
                "retry.multiplier",
                format!("must be >= 1.0, got {}", self.multiplier),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::invalid_value(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Recovery
// ============================================================================

/// Delays and thresholds of the recovery strategy table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// CONNECTION_FAILED / NETWORK_UNAVAILABLE
    #[serde(default = "default_connection_delay_ms")]
    pub connection_retry_delay_ms: u64,

    /// TIMEOUT
    #[serde(default = "default_timeout_delay_ms")]
    pub timeout_retry_delay_ms: u64,

    /// Factor applied to the request timeout after a TIMEOUT
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,

    /// SERVER_ERROR, scaled by the attempt number
    #[serde(default = "default_server_error_delay_ms")]
    pub server_error_delay_ms: u64,

    /// Attempts below this retry a SERVER_ERROR; from here on, fall back to cache
    #[serde(default = "default_server_error_threshold")]
    pub server_error_retry_threshold: u32,

    /// RATE_LIMITED
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,

    /// Lower bound of the randomized CONCURRENT/DUPLICATE delay
    #[serde(default = "default_race_min_ms")]
    pub race_delay_min_ms: u64,

    /// Upper bound of the randomized CONCURRENT/DUPLICATE delay
    #[serde(default = "default_race_max_ms")]
    pub race_delay_max_ms: u64,

    /// REQUEST_QUEUE_OVERFLOW
    #[serde(default = "default_queue_overflow_delay_ms")]
    pub queue_overflow_delay_ms: u64,

    /// STATE_TRANSITION_CONFLICT
    #[serde(default = "default_transition_conflict_delay_ms")]
    pub transition_conflict_delay_ms: u64,

    /// RESOURCE_LOCK_TIMEOUT
    #[serde(default = "default_lock_timeout_delay_ms")]
    pub lock_timeout_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            connection_retry_delay_ms: default_connection_delay_ms(),
            timeout_retry_delay_ms: default_timeout_delay_ms(),
            timeout_multiplier: default_timeout_multiplier(),
            server_error_delay_ms: default_server_error_delay_ms(),
            server_error_retry_threshold: default_server_error_threshold(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            race_delay_min_ms: default_race_min_ms(),
            race_delay_max_ms: default_race_max_ms(),
            queue_overflow_delay_ms: default_queue_overflow_delay_ms(),
            transition_conflict_delay_ms: default_transition_conflict_delay_ms(),
            lock_timeout_delay_ms: default_lock_timeout_delay_ms(),
        }
    }
}

impl RecoveryConfig {
    fn validate(&self) -> Result<()> {
        if self.race_delay_min_ms > self.race_delay_max_ms {
            return Err(Error::invalid_value(
                "recovery.race_delay_min_ms",
                "must not exceed recovery.race_delay_max_ms",
            ));
        }
        if !self.timeout_multiplier.is_finite() || self.timeout_multiplier < 1.0 {
            return Err(Error::invalid_value(
                "recovery.timeout_multiplier",
                "must be >= 1.0",
            ));
        }
        Ok(())
    }
}

fn default_connection_delay_ms() -> u64 {
    2000
}

fn default_timeout_delay_ms() -> u64 {
    1000
}

fn default_timeout_multiplier() -> f64 {
    1.5
}

fn default_server_error_delay_ms() -> u64 {
    3000
}

fn default_server_error_threshold() -> u32 {
    2
}

fn default_rate_limit_delay_ms() -> u64 {
    5000
}

fn default_race_min_ms() -> u64 {
    500
}

fn default_race_max_ms() -> u64 {
    1500
}

fn default_queue_overflow_delay_ms() -> u64 {
    2000
}

fn default_transition_conflict_delay_ms() -> u64 {
    1000
}

fn default_lock_timeout_delay_ms() -> u64 {
    1500
}

// ============================================================================
// Reporter
// ============================================================================

/// Error history sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Records kept per history (errors, recoveries)
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Entries in the recent-trend summary
    #[serde(default = "default_trend_size")]
    pub trend_size: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            trend_size: default_trend_size(),
        }
    }
}

impl ReporterConfig {
    fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(Error::invalid_value(
                "reporter.history_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn default_history_capacity() -> usize {
    100
}

fn default_trend_size() -> usize {
    10
}

// ============================================================================
// Optimizer
// ============================================================================

/// Network request optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Queue requests and flush them together
    #[serde(default = "default_true")]
    pub batching_enabled: bool,

    /// Flush as soon as this many requests are queued
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush this long after the first queued request
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Requests executed at once while flushing
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Cache entry lifetime
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Entries kept before LRU eviction
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,

    /// Allow background prefetching
    #[serde(default = "default_true")]
    pub prefetch_enabled: bool,

    /// Wait before a prefetch starts
    #[serde(default = "default_prefetch_delay_ms")]
    pub prefetch_delay_ms: u64,

    /// Prefetch requests allowed per second
    #[serde(default = "default_prefetch_per_second")]
    pub prefetch_per_second: u32,

    /// Timeout used when a request does not set one
    #[serde(default = "default_request_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Round-trip time above which timeouts are lengthened
    #[serde(default = "default_high_rtt_ms")]
    pub high_rtt_ms: u64,

    /// Round-trip time below which timeouts are shortened
    #[serde(default = "default_low_rtt_ms")]
    pub low_rtt_ms: u64,

    /// Floor for adapted timeouts
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,

    /// Ceiling for adapted timeouts
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            max_concurrent_requests: default_max_concurrent(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_max_size: default_cache_max_size(),
            prefetch_enabled: true,
            prefetch_delay_ms: default_prefetch_delay_ms(),
            prefetch_per_second: default_prefetch_per_second(),
            default_timeout_ms: default_request_timeout_ms(),
            high_rtt_ms: default_high_rtt_ms(),
            low_rtt_ms: default_low_rtt_ms(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
        }
    }
}

impl OptimizerConfig {
    /// Cache entry lifetime as a duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Batch flush timeout as a duration
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Default request timeout as a duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid_value(
                "optimizer.batch_size",
                "must be at least 1",
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::invalid_value(
                "optimizer.max_concurrent_requests",
                "must be at least 1",
            ));
        }
        if self.cache_max_size == 0 {
            return Err(Error::invalid_value(
                "optimizer.cache_max_size",
                "must be at least 1",
            ));
        }
        if self.min_timeout_ms > self.max_timeout_ms {
            return Err(Error::invalid_value(
                "optimizer.min_timeout_ms",
                "must not exceed optimizer.max_timeout_ms",
            ));
        }
        if self.low_rtt_ms > self.high_rtt_ms {
            return Err(Error::invalid_value(
                "optimizer.low_rtt_ms",
                "must not exceed optimizer.high_rtt_ms",
            ));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_timeout_ms() -> u64 {
    50
}

fn default_max_concurrent() -> usize {
    6
}

fn default_cache_ttl_ms() -> u64 {
    300_000
}

fn default_cache_max_size() -> usize {
    100
}

fn default_prefetch_delay_ms() -> u64 {
    100
}

fn default_prefetch_per_second() -> u32 {
    2
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_high_rtt_ms() -> u64 {
    1000
}

fn default_low_rtt_ms() -> u64 {
    150
}

fn default_min_timeout_ms() -> u64 {
    2000
}

fn default_max_timeout_ms() -> u64 {
    60_000
}

// ============================================================================
// Loading
// ============================================================================

/// Load and validate a config file (YAML or JSON)
pub fn load_config(path: impl AsRef<Path>) -> Result<FeedConfig> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::FileNotFound {
                path: path.display().to_string(),
            });
        }
        read => read.with_context(|| format!("Failed to read config file '{}'", path.display()))?,
    };
    load_config_from_str(&content)
}

/// Parse and validate a config document
pub fn load_config_from_str(yaml: &str) -> Result<FeedConfig> {
    let config: FeedConfig = if yaml.trim().is_empty() {
        FeedConfig::default()
    } else {
        serde_yaml::from_str(yaml)?
    };

    config.validate()?;
    Ok(config)
}
