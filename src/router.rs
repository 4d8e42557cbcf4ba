//! Classifies inbound channel traffic into chat lines and call-control
//! signals.
//!
//! Routing is a pure function of the message, its channel and its sender:
//! it returns a [`Route`] describing what the session controller must do and
//! never touches the call session itself.

use crate::signal::{Signal, SignalKind, WireMessage};

/// Call surface change requested by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceChange {
    Reveal,
    Hide,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallRoute {
    pub kind: SignalKind,
    pub sender: String,
    /// Channel a call session must be bound to if none exists yet.
    pub bind_channel: Option<String>,
    pub surface: Option<SurfaceChange>,
    /// Signal to hand to the call state machine; `None` for self-echoes.
    pub signal: Option<Signal>,
}

impl CallRoute {
    pub fn is_self_echo(&self) -> bool {
        self.signal.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Chat { from: String, text: String },
    Call(CallRoute),
    Ignored { reason: String },
}

pub struct SignalRouter {
    local_id: String,
}

impl SignalRouter {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
        }
    }

    /// Route a raw transport payload.
    pub fn route_value(&self, payload: &serde_json::Value, channel: &str, sender: &str) -> Route {
        match WireMessage::from_value(payload) {
            Ok(message) => self.route(&message, channel, sender),
            Err(e) => {
                log::warn!("Dropping undecodable message from {}: {}", sender, e);
                Route::Ignored {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn route(&self, message: &WireMessage, channel: &str, sender: &str) -> Route {
        let (kind, content) = match message {
            WireMessage::UserMessage { content } => {
                return Route::Chat {
                    from: sender.to_string(),
                    text: content.clone(),
                }
            }
            WireMessage::WebRtcSignal { value, content } => (*value, content.as_ref()),
        };

        let surface = match kind {
            SignalKind::Decline => Some(SurfaceChange::Hide),
            SignalKind::Offer => Some(SurfaceChange::Reveal),
            SignalKind::Answer | SignalKind::Candidate => None,
        };

        if sender == self.local_id {
            log::debug!("Suppressing echo of our own {} on {}", kind, channel);
            return Route::Call(CallRoute {
                kind,
                sender: sender.to_string(),
                bind_channel: None,
                surface,
                signal: None,
            });
        }

        match Signal::decode(kind, content) {
            Ok(signal) => Route::Call(CallRoute {
                kind,
                sender: sender.to_string(),
                bind_channel: Some(channel.to_string()),
                surface,
                signal: Some(signal),
            }),
            Err(e) => {
                log::warn!("Dropping malformed {} from {}: {}", kind, sender, e);
                Route::Ignored {
                    reason: e.to_string(),
                }
            }
        }
    }
}
