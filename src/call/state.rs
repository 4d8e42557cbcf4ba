use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the offer/answer exchange a session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Negotiation {
    /// Peer connection allocated, no description exchanged yet.
    Awaiting,
    /// Our offer is out, waiting for the answer.
    Offering,
    /// Handling a remote offer.
    Answering,
}

/// Lifecycle of the call state machine.
///
/// `Idle` and `Closed` both mean there is no session; a new one can be
/// created from either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    #[default]
    Idle,
    Negotiating(Negotiation),
    Connected,
    Closed,
}

impl CallState {
    pub fn has_session(self) -> bool {
        matches!(self, CallState::Negotiating(_) | CallState::Connected)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "idle"),
            CallState::Negotiating(Negotiation::Awaiting) => write!(f, "negotiating"),
            CallState::Negotiating(Negotiation::Offering) => write!(f, "negotiating (offering)"),
            CallState::Negotiating(Negotiation::Answering) => write!(f, "negotiating (answering)"),
            CallState::Connected => write!(f, "connected"),
            CallState::Closed => write!(f, "closed"),
        }
    }
}
