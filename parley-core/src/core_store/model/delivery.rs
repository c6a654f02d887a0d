/*
    delivery.rs - Per-message delivery state machine

    States only move forward:

        Sent ──► Delivered ──► Read
          └──────────────────────▲

    Acknowledgements (delivered/read receipts) that arrive late or twice are
    no-ops. Explicit transition requests that point backwards are rejected
    and leave the stored state untouched.
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Delivery stage of a message, ordered `Sent < Delivered < Read`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Committed to the log (initial state)
    Sent,
    /// Receiver's client acknowledged receipt
    Delivered,
    /// Receiver has seen the message (terminal)
    Read,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Sent => "sent",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Read => "read",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Read)
    }
}

impl Default for DeliveryState {
    fn default() -> Self {
        DeliveryState::Sent
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of applying a delivery transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State moved forward in a single observable step
    Advanced { from: DeliveryState, to: DeliveryState },
    /// Requested state was already reached
    Unchanged(DeliveryState),
}

impl Transition {
    /// State after the transition was applied
    pub fn state(&self) -> DeliveryState {
        match self {
            Transition::Advanced { to, .. } => *to,
            Transition::Unchanged(state) => *state,
        }
    }

    pub fn is_advanced(&self) -> bool {
        matches!(self, Transition::Advanced { .. })
    }
}

/// A backward transition was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move delivery state backwards from {from} to {to}")]
pub struct TransitionError {
    pub from: DeliveryState,
    pub to: DeliveryState,
}

/// Governs valid delivery-state transitions
pub struct DeliveryStateMachine;

impl DeliveryStateMachine {
    /// Apply a receipt-style acknowledgement.
    ///
    /// Anything at or behind `current` is a no-op. Jumping from `Sent` straight
    /// to `Read` is one transition: the implied `Delivered` step is never
    /// observable on its own.
    pub fn acknowledge(current: DeliveryState, target: DeliveryState) -> Transition {
        if target > current {
            Transition::Advanced { from: current, to: target }
        } else {
            Transition::Unchanged(current)
        }
    }

    /// Apply an explicit transition request.
    ///
    /// Same as [`acknowledge`](Self::acknowledge) except that a request for a
    /// state strictly behind `current` is rejected.
    pub fn request(
        current: DeliveryState,
        target: DeliveryState,
    ) -> Result<Transition, TransitionError> {
        if target < current {
            return Err(TransitionError { from: current, to: target });
        }
        Ok(Self::acknowledge(current, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryState::*;

    #[test]
    fn test_state_ordering() {
        assert!(Sent < Delivered);
        assert!(Delivered < Read);
        assert!(Read.is_terminal());
        assert_eq!(DeliveryState::default(), Sent);
    }

    #[test]
    fn test_acknowledge_forward() {
        assert_eq!(
            DeliveryStateMachine::acknowledge(Sent, Delivered),
            Transition::Advanced { from: Sent, to: Delivered }
        );
        assert_eq!(
            DeliveryStateMachine::acknowledge(Delivered, Read),
            Transition::Advanced { from: Delivered, to: Read }
        );
    }

    #[test]
    fn test_read_from_sent_is_single_jump() {
        let transition = DeliveryStateMachine::acknowledge(Sent, Read);
        assert_eq!(transition, Transition::Advanced { from: Sent, to: Read });
        assert_eq!(transition.state(), Read);
    }

    #[test]
    fn test_acknowledge_stale_is_noop() {
        assert_eq!(DeliveryStateMachine::acknowledge(Read, Delivered), Transition::Unchanged(Read));
        assert_eq!(DeliveryStateMachine::acknowledge(Read, Read), Transition::Unchanged(Read));
        assert!(!DeliveryStateMachine::acknowledge(Delivered, Sent).is_advanced());
    }

    #[test]
    fn test_explicit_backward_rejected() {
        let err = DeliveryStateMachine::request(Read, Sent).unwrap_err();
        assert_eq!(err, TransitionError { from: Read, to: Sent });
        assert!(DeliveryStateMachine::request(Delivered, Sent).is_err());
        assert!(DeliveryStateMachine::request(Read, Delivered).is_err());
    }

    #[test]
    fn test_explicit_same_state_is_noop() {
        assert_eq!(DeliveryStateMachine::request(Delivered, Delivered), Ok(Transition::Unchanged(Delivered)));
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Delivered).unwrap(), "\"delivered\"");
        let parsed: DeliveryState = serde_json::from_str("\"read\"").unwrap();
        assert_eq!(parsed, Read);
    }
}
