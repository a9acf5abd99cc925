//! Recovery strategies
//!
//! One strategy per error family. Each strategy is a table over its
//! subtypes; [`RecoveryEngine::recover`] dispatches on the kind.

use super::types::{ErrorKind, LoadMoreError, NetworkSubtype, RaceSubtype, StateSubtype};
use crate::config::RecoveryConfig;
use crate::pagination::{FeedFilters, PaginationMode, PaginationState, SearchState};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// Results
// ============================================================================

/// Verdict of a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Attempt the operation again after `delay`
    Retry {
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// Replace the state with a clean one
    Reset,
    /// Serve previously cached data
    Fallback,
    /// Give up and surface the error
    Abort,
}

impl RecoveryAction {
    /// Short action name for logs and reports
    pub fn name(&self) -> &'static str {
        match self {
            Self::Retry { .. } => "retry",
            Self::Reset => "reset",
            Self::Fallback => "fallback",
            Self::Abort => "abort",
        }
    }

    /// Retry delay, if this is a retry
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Retry { delay } => Some(*delay),
            _ => None,
        }
    }
}

/// Outcome of running a strategy
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    /// What to do
    pub action: RecoveryAction,
    /// State to splice into the store (reset verdicts)
    #[serde(skip)]
    pub new_state: Option<PaginationState>,
    /// Lengthened request timeout (timeout retries)
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_duration_ms")]
    pub adjusted_timeout: Option<Duration>,
    /// Status message for optional display
    pub message: String,
    /// Whether the consumer should show the error (false for cancellations)
    pub surface_to_user: bool,
}

impl RecoveryResult {
    fn new(action: RecoveryAction, message: impl Into<String>) -> Self {
        Self {
            action,
            new_state: None,
            adjusted_timeout: None,
            message: message.into(),
            surface_to_user: true,
        }
    }

    fn with_state(mut self, state: PaginationState) -> Self {
        self.new_state = Some(state);
        self
    }
}

/// Inputs a strategy may consult
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    /// 1-based attempt that produced the error
    pub attempt: u32,
    /// State at the time of failure
    pub state: &'a PaginationState,
    /// Timeout the failed request used
    pub current_timeout: Duration,
}

// ============================================================================
// Network
// ============================================================================

/// Recovery for transport failures
#[derive(Debug, Clone)]
pub struct NetworkRecovery {
    config: RecoveryConfig,
}

impl NetworkRecovery {
    fn recover(&self, subtype: NetworkSubtype, ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let c = &self.config;
        match subtype {
            NetworkSubtype::ConnectionFailed | NetworkSubtype::NetworkUnavailable => {
                RecoveryResult::new(
                    retry(c.connection_retry_delay_ms),
                    "Connection lost, retrying",
                )
            }
            NetworkSubtype::Timeout => {
                let mut result = RecoveryResult::new(
                    retry(c.timeout_retry_delay_ms),
                    "Request timed out, retrying with a longer timeout",
                );
                result.adjusted_timeout = Some(ctx.current_timeout.mul_f64(c.timeout_multiplier));
                result
            }
            NetworkSubtype::ServerError => {
                if ctx.attempt < c.server_error_retry_threshold {
                    RecoveryResult::new(
                        retry(c.server_error_delay_ms.saturating_mul(u64::from(ctx.attempt.max(1)))),
                        "Server error, retrying",
                    )
                } else {
                    RecoveryResult::new(RecoveryAction::Fallback, "Server error, showing cached content")
                }
            }
            NetworkSubtype::RateLimited => {
                RecoveryResult::new(retry(c.rate_limit_delay_ms), "Rate limited, retrying shortly")
            }
            NetworkSubtype::Unauthorized | NetworkSubtype::Forbidden => {
                RecoveryResult::new(RecoveryAction::Abort, "Please sign in again")
            }
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Recovery for corrupted or inconsistent state
#[derive(Debug, Clone)]
pub struct StateRecovery;

impl StateRecovery {
    fn recover(&self, subtype: StateSubtype, ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let items_per_page = ctx.state.items_per_page.max(1);
        match subtype {
            StateSubtype::InvalidState
            | StateSubtype::StateCorruption
            | StateSubtype::InconsistentData => {
                let mut clean = PaginationState::new(items_per_page);
                clean.recompute();
                RecoveryResult::new(RecoveryAction::Reset, "Feed state was reset").with_state(clean)
            }
            StateSubtype::InvalidPaginationState => {
                let mut state = ctx.state.clone();
                state.items_per_page = items_per_page;
                state.current_page = 1;
                state.window_items.clear();
                state.recompute();
                RecoveryResult::new(RecoveryAction::Reset, "Pagination was reset to the first page")
                    .with_state(state)
            }
            StateSubtype::FilterStateMismatch | StateSubtype::SearchStateInvalid => {
                let mut state = ctx.state.clone();
                state.items_per_page = items_per_page;
                state.search = SearchState::default();
                state.filters = FeedFilters::default();
                state.mode = PaginationMode::Server;
                state.current_page = 1;
                state.has_more = !state.metadata.server_exhausted;
                state.recompute();
                RecoveryResult::new(RecoveryAction::Reset, "Search and filters were cleared")
                    .with_state(state)
            }
        }
    }
}

// ============================================================================
// Race Conditions
// ============================================================================

/// Recovery for overlapping operations
#[derive(Debug, Clone)]
pub struct RaceRecovery {
    config: RecoveryConfig,
}

impl RaceRecovery {
    fn recover(&self, subtype: RaceSubtype, _ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let c = &self.config;
        match subtype {
            RaceSubtype::ConcurrentRequest | RaceSubtype::DuplicateRequest => {
                let delay = rand::thread_rng().gen_range(c.race_delay_min_ms..=c.race_delay_max_ms);
                RecoveryResult::new(retry(delay), "Another load is running, retrying")
            }
            RaceSubtype::RequestQueueOverflow => {
                RecoveryResult::new(retry(c.queue_overflow_delay_ms), "Request queue full, retrying")
            }
            RaceSubtype::StateTransitionConflict => RecoveryResult::new(
                retry(c.transition_conflict_delay_ms),
                "State changed during load, retrying",
            ),
            RaceSubtype::ResourceLockTimeout => {
                RecoveryResult::new(retry(c.lock_timeout_delay_ms), "Resource busy, retrying")
            }
            RaceSubtype::OperationCancelled => {
                let mut result = RecoveryResult::new(RecoveryAction::Abort, "Load cancelled");
                result.surface_to_user = false;
                result
            }
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Selects and runs the strategy owning an error's kind
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    network: NetworkRecovery,
    state: StateRecovery,
    race: RaceRecovery,
}

impl RecoveryEngine {
    /// Create an engine from the recovery table
    ///
    /// Inverted race-delay bounds are swapped, so a config built without
    /// validation still yields a usable window.
    pub fn new(mut config: RecoveryConfig) -> Self {
        if config.race_delay_min_ms > config.race_delay_max_ms {
            std::mem::swap(&mut config.race_delay_min_ms, &mut config.race_delay_max_ms);
        }
        Self {
            network: NetworkRecovery {
                config: config.clone(),
            },
            state: StateRecovery,
            race: RaceRecovery { config },
        }
    }

    /// Decide how to recover from `error`
    pub fn recover(&self, error: &LoadMoreError, ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let result = match error.kind {
            ErrorKind::Network(subtype) => self.network.recover(subtype, ctx),
            ErrorKind::State(subtype) => self.state.recover(subtype, ctx),
            ErrorKind::RaceCondition(subtype) => self.race.recover(subtype, ctx),
        };

        match result.action {
            RecoveryAction::Abort if result.surface_to_user => {
                warn!(code = %error.kind, attempt = ctx.attempt, "Recovery aborted: {}", result.message);
            }
            action => {
                info!(
                    code = %error.kind,
                    attempt = ctx.attempt,
                    action = action.name(),
                    delay = ?action.delay(),
                    "{}",
                    result.message
                );
            }
        }
        result
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

fn retry(delay_ms: u64) -> RecoveryAction {
    RecoveryAction::Retry {
        delay: Duration::from_millis(delay_ms),
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

mod opt_duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }
}
