//! Network conditions and request adaptation

use crate::config::OptimizerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A new round-trip sample counts for 1/RTT_WINDOW of the moving average
const RTT_WINDOW: u32 = 5;

/// Timeout factor applied under high round-trip time
const SLOW_TIMEOUT_FACTOR: f64 = 2.0;

/// Timeout factor applied under low round-trip time
const FAST_TIMEOUT_FACTOR: f64 = 0.75;

/// Coarse connection class, as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectiveType {
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    Unknown,
}

impl EffectiveType {
    /// Whether the link is too slow for speculative traffic
    pub fn is_low_bandwidth(self) -> bool {
        matches!(self, Self::Slow2g | Self::TwoG)
    }
}

/// Measured and reported network conditions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    /// Smoothed round-trip time
    pub rtt: Option<Duration>,
    /// Downlink estimate in Mbit/s
    pub downlink_mbps: Option<f64>,
    /// Connection class
    pub effective_type: EffectiveType,
    /// The user asked to reduce data usage
    pub save_data: bool,
}

impl NetworkConditions {
    /// Fold a new round-trip sample into the moving average
    pub fn record_rtt(&mut self, sample: Duration) {
        self.rtt = Some(match self.rtt {
            Some(current) => (current * (RTT_WINDOW - 1) + sample) / RTT_WINDOW,
            None => sample,
        });
    }

    /// Whether low-priority traffic should be skipped
    pub fn is_constrained(&self) -> bool {
        self.save_data || self.effective_type.is_low_bandwidth()
    }
}

/// Request priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-request options consulted by the optimizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Cache key
    pub key: String,
    /// Priority
    pub priority: RequestPriority,
    /// Timeout; the configured default applies when unset
    pub timeout: Option<Duration>,
    /// Cache invalidation tags
    pub tags: Vec<String>,
}

impl RequestOptions {
    /// Options for the given cache key
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Adjust `options` to the current conditions
///
/// Returns `None` when the request should not be sent at all (low priority
/// on a constrained link). Otherwise the timeout is scaled by the smoothed
/// round-trip time and clamped to the configured bounds.
pub fn adapt_request(
    options: RequestOptions,
    conditions: &NetworkConditions,
    config: &OptimizerConfig,
) -> Option<RequestOptions> {
    if options.priority == RequestPriority::Low && conditions.is_constrained() {
        return None;
    }

    let base = options.timeout.unwrap_or_else(|| config.default_timeout());
    let scaled = match conditions.rtt {
        Some(rtt) if rtt > Duration::from_millis(config.high_rtt_ms) => {
            base.mul_f64(SLOW_TIMEOUT_FACTOR)
        }
        Some(rtt) if rtt < Duration::from_millis(config.low_rtt_ms) => {
            base.mul_f64(FAST_TIMEOUT_FACTOR)
        }
        _ => base,
    };
    let timeout = scaled
        .max(Duration::from_millis(config.min_timeout_ms))
        .min(Duration::from_millis(config.max_timeout_ms));

    Some(RequestOptions {
        timeout: Some(timeout),
        ..options
    })
}
