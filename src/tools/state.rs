//! Dispatch call state machine
//!
//! ```text
//! Pending -> Resolving -> LocalRunning -> Succeeded | Failed | TimedOut
//!                      -> Proxied      -> Succeeded | Failed | TimedOut
//! Pending | Resolving  -> Failed        (validation, lock denial)
//! ```
//!
//! Terminal states absorb every further event. There is no retry edge: a
//! timed-out call stays timed out and the caller re-issues it.

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one dispatch call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Pending,
    Resolving,
    LocalRunning,
    Proxied,
    Succeeded,
    Failed,
    TimedOut,
}

/// Events that move a call forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// Task validated, looking the tool up
    Resolve,

    /// Local tool invoked
    RunLocal,

    /// Call handed to the proxy bridge
    Forward,

    /// Tool produced a successful envelope
    Complete,

    /// Any failure short of a timeout
    Fail,

    /// Per-call bound exceeded
    Expire,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Succeeded | CallState::Failed | CallState::TimedOut)
    }

    /// Attempt state transition
    pub fn transition(&self, event: CallEvent) -> Result<CallState> {
        use CallEvent::*;
        use CallState::*;

        let next = match (self, event) {
            (Pending, Resolve) => Resolving,
            (Pending, Fail) => Failed,

            (Resolving, RunLocal) => LocalRunning,
            (Resolving, Forward) => Proxied,
            (Resolving, Fail) => Failed,

            (LocalRunning | Proxied, Complete) => Succeeded,
            (LocalRunning | Proxied, Fail) => Failed,
            (LocalRunning | Proxied, Expire) => TimedOut,

            (Succeeded, _) => Succeeded,
            (Failed, _) => Failed,
            (TimedOut, _) => TimedOut,

            (from, event) => {
                return Err(EngineError::InvalidTransition {
                    from: format!("{:?}", from),
                    event: format!("{:?}", event),
                });
            }
        };

        Ok(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Pending => "pending",
            CallState::Resolving => "resolving",
            CallState::LocalRunning => "local_running",
            CallState::Proxied => "proxied",
            CallState::Succeeded => "succeeded",
            CallState::Failed => "failed",
            CallState::TimedOut => "timed_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_happy_path() {
        let state = CallState::Pending
            .transition(CallEvent::Resolve)
            .and_then(|s| s.transition(CallEvent::RunLocal))
            .and_then(|s| s.transition(CallEvent::Complete))
            .unwrap();
        assert_eq!(state, CallState::Succeeded);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_proxied_timeout() {
        let state = CallState::Resolving
            .transition(CallEvent::Forward)
            .and_then(|s| s.transition(CallEvent::Expire))
            .unwrap();
        assert_eq!(state, CallState::TimedOut);
    }

    #[test]
    fn test_validation_failure_before_running() {
        assert_eq!(
            CallState::Pending.transition(CallEvent::Fail).unwrap(),
            CallState::Failed
        );
        assert_eq!(
            CallState::Resolving.transition(CallEvent::Fail).unwrap(),
            CallState::Failed
        );
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [CallState::Succeeded, CallState::Failed, CallState::TimedOut] {
            for event in [CallEvent::Resolve, CallEvent::Complete, CallEvent::Expire] {
                assert_eq!(terminal.transition(event).unwrap(), terminal);
            }
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(CallState::Pending.transition(CallEvent::Complete).is_err());
        assert!(CallState::Pending.transition(CallEvent::RunLocal).is_err());
        assert!(CallState::Resolving.transition(CallEvent::Expire).is_err());
        assert!(CallState::LocalRunning.transition(CallEvent::Forward).is_err());
    }
}
