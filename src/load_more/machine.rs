//! Load-more state machine
//!
//! Governs a single load-more operation. `can_load_more` is the duplicate
//! request guard: it is false for as long as a load is in flight.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// States of a load-more cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadMoreState {
    #[default]
    Idle,
    LoadingServer,
    LoadingClient,
    Complete,
    Error,
}

impl LoadMoreState {
    /// Whether a load is in flight
    pub fn is_loading(self) -> bool {
        matches!(self, Self::LoadingServer | Self::LoadingClient)
    }

    /// Whether the cycle has settled
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Targets reachable from this state
    pub fn allowed_targets(self) -> &'static [LoadMoreState] {
        use LoadMoreState::{Complete, Error, Idle, LoadingClient, LoadingServer};
        match self {
            Idle => &[LoadingServer, LoadingClient],
            LoadingServer | LoadingClient => &[Complete, Error],
            Complete | Error => &[Idle, LoadingServer, LoadingClient],
        }
    }
}

impl fmt::Display for LoadMoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::LoadingServer => "loading-server",
            Self::LoadingClient => "loading-client",
            Self::Complete => "complete",
            Self::Error => "error",
        })
    }
}

/// A recorded transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: LoadMoreState,
    pub to: LoadMoreState,
    pub at: DateTime<Utc>,
}

/// Finite state machine for one in-flight load-more
#[derive(Debug, Clone, Default)]
pub struct LoadMoreStateMachine {
    state: LoadMoreState,
    last_transition: Option<Transition>,
    transitions: u64,
}

impl LoadMoreStateMachine {
    /// Create a machine in `idle`
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> LoadMoreState {
        self.state
    }

    /// Most recent successful transition
    pub fn last_transition(&self) -> Option<&Transition> {
        self.last_transition.as_ref()
    }

    /// Number of successful transitions
    pub fn transition_count(&self) -> u64 {
        self.transitions
    }

    /// Whether `to` is a valid target from the current state
    pub fn can_transition(&self, to: LoadMoreState) -> bool {
        self.state.allowed_targets().contains(&to)
    }

    /// Move to `to`, or fail without changing anything
    pub fn transition(&mut self, to: LoadMoreState) -> Result<()> {
        if !self.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }

        debug!(from = %self.state, to = %to, "Load-more transition");
        self.last_transition = Some(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        self.transitions += 1;
        Ok(())
    }

    /// True only in the two loading states
    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// True when a new load may start (`idle`, `complete`, `error`)
    pub fn can_load_more(&self) -> bool {
        !self.state.is_loading()
    }

    /// Force the machine back to `idle`
    pub fn reset(&mut self) {
        if self.state != LoadMoreState::Idle {
            debug!(from = %self.state, "Load-more machine reset");
        }
        self.state = LoadMoreState::Idle;
        self.last_transition = None;
    }
}
