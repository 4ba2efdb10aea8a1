//! Server lifecycle state machine.
//!
//! This module defines the valid state transitions for servers and provides
//! validation logic to ensure state machine invariants are maintained.
//!
//! # State Machine
//!
//! ```text
//!     ┌──────────────┐
//!     │ Provisioning │
//!     └──────┬───────┘
//!            │ (provider reports public ip)
//!            ▼
//!     ┌──────────────┐   (reused)   ┌──────────────┐
//!     │    Active    │◄─────────────│   Draining   │
//!     │              │─────────────▶│              │
//!     └──────────────┘ (scale down) └──────┬───────┘
//!                                          │ (drained or timer expired)
//!                                          ▼
//!                                   ┌──────────────┐
//!                                   │  Terminated  │
//!                                   └──────────────┘
//! ```

use fleetplane_core::{ServerId, ServerState};

use crate::error::{ControlError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    server_id: &ServerId,
    from: ServerState,
    to: ServerState,
) -> Result<ServerState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidTransition {
            server_id: *server_id,
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: ServerState, to: ServerState) -> bool {
    use ServerState::{Active, Draining, Provisioning, Terminated};

    matches!(
        (from, to),
        (Provisioning | Draining, Active) | (Active, Draining) | (Draining, Terminated)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: ServerState) -> Vec<ServerState> {
    use ServerState::{Active, Draining, Provisioning, Terminated};

    match state {
        Provisioning => vec![Active],
        Active => vec![Draining],
        Draining => vec![Active, Terminated],
        Terminated => vec![],
    }
}

/// Returns true if the server counts toward its pool's live total.
#[must_use]
pub const fn is_live(state: ServerState) -> bool {
    matches!(state, ServerState::Provisioning | ServerState::Active)
}

/// Returns true if the server may be selected for draining.
#[must_use]
pub const fn can_drain(state: ServerState) -> bool {
    matches!(state, ServerState::Active)
}

/// Returns true if the server may be reused to satisfy a scale up.
#[must_use]
pub const fn can_reuse(state: ServerState) -> bool {
    matches!(state, ServerState::Draining)
}

/// Returns true if the server still has a provider instance behind it.
#[must_use]
pub const fn has_instance(state: ServerState) -> bool {
    !matches!(state, ServerState::Terminated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use ServerState::*;

        assert!(is_valid_transition(Provisioning, Active));
        assert!(is_valid_transition(Active, Draining));
        assert!(is_valid_transition(Draining, Terminated));
        // Reuse cancels a drain
        assert!(is_valid_transition(Draining, Active));
    }

    #[test]
    fn invalid_transitions() {
        use ServerState::*;

        // No skipping states
        assert!(!is_valid_transition(Provisioning, Draining));
        assert!(!is_valid_transition(Provisioning, Terminated));
        assert!(!is_valid_transition(Active, Terminated));
        // Terminated is final
        assert!(!is_valid_transition(Terminated, Active));
        assert!(!is_valid_transition(Terminated, Provisioning));
        // No going back to provisioning
        assert!(!is_valid_transition(Active, Provisioning));
    }

    #[test]
    fn validate_transition_err() {
        let server_id = ServerId::from_bytes([1u8; 16]);
        let result =
            validate_transition(&server_id, ServerState::Provisioning, ServerState::Terminated);

        match result {
            Err(ControlError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, ServerState::Provisioning);
                assert_eq!(to, ServerState::Terminated);
            }
            _ => panic!("expected InvalidTransition error"),
        }
    }

    #[test]
    fn transitions_table_agrees_with_predicate() {
        for from in ServerState::ALL {
            for to in ServerState::ALL {
                assert_eq!(
                    valid_transitions_from(*from).contains(to),
                    is_valid_transition(*from, *to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn state_predicates() {
        assert!(is_live(ServerState::Provisioning));
        assert!(is_live(ServerState::Active));
        assert!(!is_live(ServerState::Draining));
        assert!(can_drain(ServerState::Active));
        assert!(!can_drain(ServerState::Provisioning));
        assert!(can_reuse(ServerState::Draining));
        assert!(!has_instance(ServerState::Terminated));
    }
}
