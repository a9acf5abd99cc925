//! Error taxonomy types
//!
//! Every load-more failure is a [`LoadMoreError`] whose [`ErrorKind`] is a
//! tagged union over the three failure families. Recovery dispatch matches
//! on the kind exhaustively.

use crate::types::{JsonValue, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Subtypes
// ============================================================================

/// Transport and protocol failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkSubtype {
    ConnectionFailed,
    NetworkUnavailable,
    Timeout,
    ServerError,
    RateLimited,
    Unauthorized,
    Forbidden,
}

/// Invariant violations or corrupted in-memory state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateSubtype {
    InvalidState,
    StateCorruption,
    InconsistentData,
    InvalidPaginationState,
    FilterStateMismatch,
    SearchStateInvalid,
}

/// Conflicts between overlapping operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceSubtype {
    ConcurrentRequest,
    DuplicateRequest,
    RequestQueueOverflow,
    StateTransitionConflict,
    ResourceLockTimeout,
    OperationCancelled,
}

impl NetworkSubtype {
    pub const ALL: [Self; 7] = [
        Self::ConnectionFailed,
        Self::NetworkUnavailable,
        Self::Timeout,
        Self::ServerError,
        Self::RateLimited,
        Self::Unauthorized,
        Self::Forbidden,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::ServerError => "SERVER_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
        }
    }
}

impl StateSubtype {
    pub const ALL: [Self; 6] = [
        Self::InvalidState,
        Self::StateCorruption,
        Self::InconsistentData,
        Self::InvalidPaginationState,
        Self::FilterStateMismatch,
        Self::SearchStateInvalid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidState => "INVALID_STATE",
            Self::StateCorruption => "STATE_CORRUPTION",
            Self::InconsistentData => "INCONSISTENT_DATA",
            Self::InvalidPaginationState => "INVALID_PAGINATION_STATE",
            Self::FilterStateMismatch => "FILTER_STATE_MISMATCH",
            Self::SearchStateInvalid => "SEARCH_STATE_INVALID",
        }
    }
}

impl RaceSubtype {
    pub const ALL: [Self; 6] = [
        Self::ConcurrentRequest,
        Self::DuplicateRequest,
        Self::RequestQueueOverflow,
        Self::StateTransitionConflict,
        Self::ResourceLockTimeout,
        Self::OperationCancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConcurrentRequest => "CONCURRENT_REQUEST",
            Self::DuplicateRequest => "DUPLICATE_REQUEST",
            Self::RequestQueueOverflow => "REQUEST_QUEUE_OVERFLOW",
            Self::StateTransitionConflict => "STATE_TRANSITION_CONFLICT",
            Self::ResourceLockTimeout => "RESOURCE_LOCK_TIMEOUT",
            Self::OperationCancelled => "OPERATION_CANCELLED",
        }
    }
}

// ============================================================================
// Error Kind
// ============================================================================

/// Discriminant of a load-more failure: family plus fine-grained subtype
///
/// Serialized as a `"FAMILY.SUBTYPE"` code, e.g. `"NETWORK.TIMEOUT"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ErrorKind {
    Network(NetworkSubtype),
    State(StateSubtype),
    RaceCondition(RaceSubtype),
}

impl ErrorKind {
    /// Family prefix of the error code
    pub fn family(self) -> &'static str {
        match self {
            Self::Network(_) => "NETWORK",
            Self::State(_) => "STATE",
            Self::RaceCondition(_) => "RACE",
        }
    }

    /// Subtype part of the error code
    pub fn subtype(self) -> &'static str {
        match self {
            Self::Network(s) => s.as_str(),
            Self::State(s) => s.as_str(),
            Self::RaceCondition(s) => s.as_str(),
        }
    }

    /// Full error code, e.g. `NETWORK.TIMEOUT`
    pub fn code(self) -> String {
        format!("{}.{}", self.family(), self.subtype())
    }

    /// Whether errors of this kind may be retried by default
    pub fn default_retryable(self) -> bool {
        match self {
            Self::Network(NetworkSubtype::Unauthorized | NetworkSubtype::Forbidden) => false,
            Self::Network(_) => true,
            Self::State(_) => false,
            Self::RaceCondition(RaceSubtype::OperationCancelled) => false,
            Self::RaceCondition(_) => true,
        }
    }

    /// Whether errors of this kind can be recovered from without the user
    pub fn default_recoverable(self) -> bool {
        !matches!(
            self,
            Self::Network(NetworkSubtype::Unauthorized | NetworkSubtype::Forbidden)
                | Self::RaceCondition(RaceSubtype::OperationCancelled)
        )
    }

    /// Every known kind
    pub fn all() -> Vec<Self> {
        NetworkSubtype::ALL
            .into_iter()
            .map(Self::Network)
            .chain(StateSubtype::ALL.into_iter().map(Self::State))
            .chain(RaceSubtype::ALL.into_iter().map(Self::RaceCondition))
            .collect()
    }

    /// Every kind whose default is retryable
    pub fn default_retryable_set() -> Vec<Self> {
        Self::all()
            .into_iter()
            .filter(|k| k.default_retryable())
            .collect()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family(), self.subtype())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Self::all()
            .into_iter()
            .find(|k| k.code() == code)
            .ok_or_else(|| format!("unknown error code '{s}'"))
    }
}

impl TryFrom<String> for ErrorKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.code()
    }
}

// ============================================================================
// Load-More Error
// ============================================================================

/// A classified load-more failure
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct LoadMoreError {
    /// Family and subtype
    pub kind: ErrorKind,
    /// Human-readable description (usually the raw error message)
    pub message: String,
    /// Whether the operation may be attempted again
    pub retryable: bool,
    /// Whether the system can recover without user action
    pub recoverable: bool,
    /// Free-form diagnostic context
    #[serde(default)]
    pub context: ValueMap,
    /// When the error was classified
    pub timestamp: DateTime<Utc>,
}

impl LoadMoreError {
    /// Create an error with the kind's default flags
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.default_retryable(),
            recoverable: kind.default_recoverable(),
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a network error
    pub fn network(subtype: NetworkSubtype, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network(subtype), message)
    }

    /// Create a state error
    pub fn state(subtype: StateSubtype, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State(subtype), message)
    }

    /// Create a race-condition error
    pub fn race(subtype: RaceSubtype, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RaceCondition(subtype), message)
    }

    /// Attach a context value
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Override the retryable flag
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Error code, e.g. `RACE.DUPLICATE_REQUEST`
    pub fn code(&self) -> String {
        self.kind.code()
    }

    /// Whether this is a user-initiated cancellation
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::RaceCondition(RaceSubtype::OperationCancelled)
    }
}

// ============================================================================
// Raw Fetch Error
// ============================================================================

/// Raw failure reported by a fetch collaborator, before classification
#[derive(Error, Debug, Clone, Default)]
#[error("{message}")]
pub struct FetchError {
    /// Raw message
    pub message: String,
    /// HTTP-like status code, when the transport has one
    pub status: Option<u16>,
    /// Extra context (error codes, request ids)
    pub context: ValueMap,
}

impl FetchError {
    /// Create a fetch error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Create a fetch error with a status code
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            context: HashMap::new(),
        }
    }

    /// Attach a context value
    #[must_use]
    pub fn context(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}
