//! Raw error classification
//!
//! Maps a raw [`FetchError`] to a [`LoadMoreError`] by looking at the status
//! code first and the message second. Unrecognized failures are treated as
//! `NETWORK.CONNECTION_FAILED`.

use super::types::{ErrorKind, FetchError, LoadMoreError, NetworkSubtype, RaceSubtype, StateSubtype};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Message patterns, checked in order; the first match wins
static PATTERNS: Lazy<Vec<(Regex, ErrorKind)>> = Lazy::new(|| {
    use ErrorKind::{Network, RaceCondition, State};

    let table: [(&str, ErrorKind); 18] = [
        (
            r"(?i)\b(cancel(l)?ed|aborted|abort)\b",
            RaceCondition(RaceSubtype::OperationCancelled),
        ),
        (
            r"(?i)already in progress|concurrent",
            RaceCondition(RaceSubtype::ConcurrentRequest),
        ),
        (r"(?i)duplicate", RaceCondition(RaceSubtype::DuplicateRequest)),
        (
            r"(?i)queue.*(overflow|full)",
            RaceCondition(RaceSubtype::RequestQueueOverflow),
        ),
        (
            r"(?i)lock.*time(d)?\s?out",
            RaceCondition(RaceSubtype::ResourceLockTimeout),
        ),
        (
            r"(?i)transition",
            RaceCondition(RaceSubtype::StateTransitionConflict),
        ),
        (
            r"(?i)time(d)?\s?out|deadline",
            Network(NetworkSubtype::Timeout),
        ),
        (
            r"(?i)rate.?limit|too many requests",
            Network(NetworkSubtype::RateLimited),
        ),
        (
            r"(?i)unauthori[sz]ed|unauthenticated|token expired",
            Network(NetworkSubtype::Unauthorized),
        ),
        (
            r"(?i)forbidden|permission denied",
            Network(NetworkSubtype::Forbidden),
        ),
        (
            r"(?i)offline|network (is )?unavailable|no network",
            Network(NetworkSubtype::NetworkUnavailable),
        ),
        (
            r"(?i)internal server error|bad gateway|service unavailable|server error",
            Network(NetworkSubtype::ServerError),
        ),
        (
            r"(?i)pagination|page (number|cursor)",
            State(StateSubtype::InvalidPaginationState),
        ),
        (r"(?i)filter", State(StateSubtype::FilterStateMismatch)),
        (r"(?i)search", State(StateSubtype::SearchStateInvalid)),
        (r"(?i)corrupt", State(StateSubtype::StateCorruption)),
        (r"(?i)inconsistent", State(StateSubtype::InconsistentData)),
        (r"(?i)invalid state", State(StateSubtype::InvalidState)),
    ];

    table
        .into_iter()
        .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
        .collect()
});

/// Classifies raw fetch failures into the error taxonomy
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Create a classifier
    pub fn new() -> Self {
        Self
    }

    /// Pick the kind for a raw error
    pub fn kind_of(&self, raw: &FetchError) -> ErrorKind {
        if let Some(kind) = raw.status.and_then(kind_for_status) {
            return kind;
        }
        if let Some(code) = raw.context.get("code").and_then(|v| v.as_str()) {
            if let Ok(kind) = code.parse::<ErrorKind>() {
                return kind;
            }
        }
        PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(&raw.message))
            .map_or(
                ErrorKind::Network(NetworkSubtype::ConnectionFailed),
                |(_, kind)| *kind,
            )
    }

    /// Classify a raw error, attaching the attempt number and raw context
    pub fn classify(&self, raw: &FetchError, attempt: u32) -> LoadMoreError {
        let kind = self.kind_of(raw);
        debug!(code = %kind, attempt, message = %raw.message, "Classified fetch error");

        let mut error = LoadMoreError::new(kind, raw.message.clone()).with_context("attempt", attempt);
        if let Some(status) = raw.status {
            error = error.with_context("status", status);
        }
        for (key, value) in &raw.context {
            error.context.entry(key.clone()).or_insert_with(|| value.clone());
        }
        error
    }
}

/// Map an HTTP-like status code to a kind
fn kind_for_status(status: u16) -> Option<ErrorKind> {
    let subtype = match status {
        401 => NetworkSubtype::Unauthorized,
        403 => NetworkSubtype::Forbidden,
        408 | 504 => NetworkSubtype::Timeout,
        429 => NetworkSubtype::RateLimited,
        500..=599 => NetworkSubtype::ServerError,
        _ => return None,
    };
    Some(ErrorKind::Network(subtype))
}
