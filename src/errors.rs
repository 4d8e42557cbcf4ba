use thiserror::Error;

/// Error category used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Logged and retried by the caller; never ends a call.
    Transport,
    /// Ends the call attempt and is shown to the user.
    Media,
    /// Ends the call attempt.
    Negotiation,
    /// Absorbed silently.
    Protocol,
    /// Caller misuse or bad deployment settings.
    Usage,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Media error: {0}")]
    Media(String),
    #[error("Negotiation error: {0}")]
    Negotiation(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Call session already active on channel {0}")]
    SessionActive(String),
    #[error("No call session")]
    NoSession,
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CallError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CallError::Transport(_) => ErrorClass::Transport,
            CallError::Media(_) => ErrorClass::Media,
            CallError::Negotiation(_) => ErrorClass::Negotiation,
            CallError::Protocol(_) => ErrorClass::Protocol,
            CallError::SessionActive(_) | CallError::NoSession | CallError::Config(_) => {
                ErrorClass::Usage
            }
        }
    }

    /// Whether this failure must end the call attempt it occurred in.
    pub fn is_fatal_to_call(&self) -> bool {
        matches!(self.class(), ErrorClass::Media | ErrorClass::Negotiation)
    }
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::Protocol(e.to_string())
    }
}

impl From<webrtc::Error> for CallError {
    fn from(e: webrtc::Error) -> Self {
        CallError::Negotiation(e.to_string())
    }
}
