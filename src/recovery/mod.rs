//! Error recovery module
//!
//! Classification, recovery strategies, retry backoff and error reporting.
//!
//! # Overview
//!
//! A raw [`FetchError`] from a fetch collaborator flows through:
//! - `ErrorClassifier` - Picks a family and subtype ([`ErrorKind`])
//! - `RecoveryEngine` - Table-driven verdict: retry, reset, fallback or abort
//! - `RetryScheduler` - Exponential backoff with jitter, bounded attempts
//! - `ErrorReporter` - Bounded history and aggregate statistics

mod classify;
mod reporter;
mod retry;
mod strategies;
mod types;

pub use classify::ErrorClassifier;
pub use reporter::{
    ErrorReport, ErrorReporter, ErrorStats, RecoveryReport, TelemetrySink, TracingSink, TrendEntry,
};
pub use retry::RetryScheduler;
pub use strategies::{RecoveryAction, RecoveryContext, RecoveryEngine, RecoveryResult};
pub use types::{
    ErrorKind, FetchError, LoadMoreError, NetworkSubtype, RaceSubtype, StateSubtype,
};

#[cfg(test)]
mod tests;
