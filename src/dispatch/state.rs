//! Dispatch states and legal transitions.
//!
//! ```text
//! BUILDING → SENT → SUCCEEDED
//!              ├──→ AUTH_EXPIRED → REFRESHING → SENT
//!              ├──→ RATE_LIMITED → BACKING_OFF → SENT
//!              └──→ FAILED
//! any non-terminal state → FAILED
//! ```

use std::fmt;

use reqwest::StatusCode;
use uuid::Uuid;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    Building,
    Sent,
    Succeeded,
    AuthExpired,
    Refreshing,
    RateLimited,
    BackingOff,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Succeeded | DispatchState::Failed)
    }

    pub fn can_transition_to(self, next: DispatchState) -> bool {
        use DispatchState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Building, Sent)
                | (Sent, Succeeded)
                | (Sent, AuthExpired)
                | (Sent, RateLimited)
                | (AuthExpired, Refreshing)
                | (Refreshing, Sent)
                | (RateLimited, BackingOff)
                | (BackingOff, Sent)
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Building => "BUILDING",
            DispatchState::Sent => "SENT",
            DispatchState::Succeeded => "SUCCEEDED",
            DispatchState::AuthExpired => "AUTH_EXPIRED",
            DispatchState::Refreshing => "REFRESHING",
            DispatchState::RateLimited => "RATE_LIMITED",
            DispatchState::BackingOff => "BACKING_OFF",
            DispatchState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Current state of one logical request, with the history of visited states.
#[derive(Debug, Clone)]
pub struct StateTracker {
    correlation_id: Uuid,
    state: DispatchState,
    history: Vec<DispatchState>,
}

impl StateTracker {
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            state: DispatchState::Building,
            history: vec![DispatchState::Building],
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn history(&self) -> &[DispatchState] {
        &self.history
    }

    pub fn advance(&mut self, next: DispatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            tracing::error!(
                correlation_id = %self.correlation_id,
                from = %self.state,
                to = %next,
                "Illegal dispatch transition"
            );
        }
        tracing::trace!(correlation_id = %self.correlation_id, from = %self.state, to = %next, "Dispatch transition");
        self.state = next;
        self.history.push(next);
    }
}

/// How a response moves the state machine out of `SENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    AuthExpired,
    RateLimited,
    Failed(ErrorKind),
}

/// Classify a response status.
///
/// A 401 on an operation sent without a credential cannot be fixed by a
/// refresh and is reported as `Unauthenticated`.
pub fn classify(status: StatusCode, requires_auth: bool) -> Classification {
    if status.is_success() {
        Classification::Success
    } else if status == StatusCode::UNAUTHORIZED {
        if requires_auth {
            Classification::AuthExpired
        } else {
            Classification::Failed(ErrorKind::Unauthenticated)
        }
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Classification::RateLimited
    } else {
        Classification::Failed(ErrorKind::ServerError)
    }
}
