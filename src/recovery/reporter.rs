//! Error reporting
//!
//! Bounded, append-only history of classified errors and recovery outcomes,
//! with aggregate statistics. Every report is also forwarded to a
//! fire-and-forget [`TelemetrySink`].

use super::strategies::RecoveryResult;
use super::types::{ErrorKind, LoadMoreError};
use crate::config::ReporterConfig;
use crate::types::lock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

// ============================================================================
// Records
// ============================================================================

/// A reported error
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    /// Sequence id, used to link recoveries
    pub id: u64,
    /// Error code
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
    /// When it was reported
    pub timestamp: DateTime<Utc>,
    /// Recovery outcome once known
    pub recovered: Option<bool>,
}

/// A reported recovery attempt
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    /// Id of the error being recovered from
    pub error_id: u64,
    /// Error code
    pub kind: ErrorKind,
    /// Action taken
    pub action: &'static str,
    /// Whether the recovery succeeded
    pub success: bool,
    /// Status message
    pub message: String,
    /// When it was reported
    pub timestamp: DateTime<Utc>,
}

/// One entry of the recent-trend summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendEntry {
    pub timestamp: DateTime<Utc>,
    pub code: String,
    pub recovered: bool,
}

/// Aggregate statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    /// Errors currently in history
    pub total_errors: usize,
    /// Errors grouped by code
    pub errors_by_code: BTreeMap<String, usize>,
    /// Successful recoveries / recovery attempts (0 when none)
    pub recovery_success_rate: f64,
    /// Most recent errors, newest last
    pub recent_trend: Vec<TrendEntry>,
}

// ============================================================================
// Telemetry Sink
// ============================================================================

/// Receiver of error and recovery reports; no response is expected
pub trait TelemetrySink: Send + Sync {
    /// An error was reported
    fn error_reported(&self, report: &ErrorReport);

    /// A recovery outcome was reported
    fn recovery_reported(&self, report: &RecoveryReport);
}

/// Sink that writes reports to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn error_reported(&self, report: &ErrorReport) {
        warn!(id = report.id, code = %report.kind, "Load-more error: {}", report.message);
    }

    fn recovery_reported(&self, report: &RecoveryReport) {
        info!(
            error_id = report.error_id,
            code = %report.kind,
            action = report.action,
            success = report.success,
            "Recovery: {}",
            report.message
        );
    }
}

// ============================================================================
// Reporter
// ============================================================================

#[derive(Default)]
struct History {
    next_id: u64,
    errors: VecDeque<ErrorReport>,
    recoveries: VecDeque<RecoveryReport>,
}

/// Bounded error and recovery history
#[derive(Clone)]
pub struct ErrorReporter {
    history: Arc<Mutex<History>>,
    sink: Arc<dyn TelemetrySink>,
    config: ReporterConfig,
}

impl ErrorReporter {
    /// Create a reporter that forwards to `tracing`
    pub fn new(config: ReporterConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a reporter with a custom sink
    pub fn with_sink(config: ReporterConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            history: Arc::new(Mutex::new(History::default())),
            sink,
            config,
        }
    }

    /// Record an error; returns its id
    pub fn report_error(&self, error: &LoadMoreError) -> u64 {
        let report = {
            let mut history = lock(&self.history);
            history.next_id += 1;
            let report = ErrorReport {
                id: history.next_id,
                kind: error.kind,
                message: error.message.clone(),
                timestamp: error.timestamp,
                recovered: None,
            };
            push_bounded(&mut history.errors, report.clone(), self.config.history_capacity);
            report
        };
        self.sink.error_reported(&report);
        report.id
    }

    /// Record the outcome of recovering from error `error_id`
    pub fn report_recovery(
        &self,
        error_id: u64,
        error: &LoadMoreError,
        result: &RecoveryResult,
        success: bool,
    ) {
        let report = RecoveryReport {
            error_id,
            kind: error.kind,
            action: result.action.name(),
            success,
            message: result.message.clone(),
            timestamp: Utc::now(),
        };
        {
            let mut history = lock(&self.history);
            if let Some(entry) = history.errors.iter_mut().rev().find(|e| e.id == error_id) {
                entry.recovered = Some(success);
            }
            push_bounded(
                &mut history.recoveries,
                report.clone(),
                self.config.history_capacity,
            );
        }
        self.sink.recovery_reported(&report);
    }

    /// Aggregate statistics over the current history
    pub fn get_error_stats(&self) -> ErrorStats {
        let history = lock(&self.history);

        let mut errors_by_code = BTreeMap::new();
        for e in &history.errors {
            *errors_by_code.entry(e.kind.code()).or_insert(0) += 1;
        }

        let attempts = history.recoveries.len();
        let successes = history.recoveries.iter().filter(|r| r.success).count();
        let recovery_success_rate = if attempts == 0 {
            0.0
        } else {
            successes as f64 / attempts as f64
        };

        let skip = history.errors.len().saturating_sub(self.config.trend_size);
        let recent_trend = history
            .errors
            .iter()
            .skip(skip)
            .map(|e| TrendEntry {
                timestamp: e.timestamp,
                code: e.kind.code(),
                recovered: e.recovered.unwrap_or(false),
            })
            .collect();

        ErrorStats {
            total_errors: history.errors.len(),
            errors_by_code,
            recovery_success_rate,
            recent_trend,
        }
    }

    /// The `n` most recent errors, newest last
    pub fn recent_errors(&self, n: usize) -> Vec<ErrorReport> {
        let history = lock(&self.history);
        let skip = history.errors.len().saturating_sub(n);
        history.errors.iter().skip(skip).cloned().collect()
    }

    /// Drop all history
    pub fn clear(&self) {
        let mut history = lock(&self.history);
        history.errors.clear();
        history.recoveries.clear();
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(ReporterConfig::default())
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, capacity: usize) {
    while queue.len() >= capacity.max(1) {
        queue.pop_front();
    }
    queue.push_back(value);
}
