//! Wire model for everything that travels over the signaling channel.
//!
//! Messages published on the channel are JSON objects tagged by `type`.
//! Chat lines carry plain text; call-control signals carry a sub-kind in
//! `value` and an optional `content` whose shape depends on that sub-kind.

use crate::errors::CallError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A message as it appears on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "user-message")]
    UserMessage { content: String },
    #[serde(rename = "WebRTCSignal")]
    WebRtcSignal {
        value: SignalKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
    },
}

impl WireMessage {
    pub fn chat(content: impl Into<String>) -> Self {
        WireMessage::UserMessage {
            content: content.into(),
        }
    }

    /// Decode a raw payload received from the transport.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CallError> {
        Ok(WireMessage::deserialize(value)?)
    }
}

/// Call-control sub-kind carried in the `value` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "video-offer")]
    Offer,
    #[serde(rename = "video-answer")]
    Answer,
    #[serde(rename = "new-ice-candidate")]
    Candidate,
    #[serde(rename = "offer-declined")]
    Decline,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "video-offer"),
            SignalKind::Answer => write!(f, "video-answer"),
            SignalKind::Candidate => write!(f, "new-ice-candidate"),
            SignalKind::Decline => write!(f, "offer-declined"),
        }
    }
}

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the browser JSON shape (`{type, sdp}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate descriptor in the browser JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// An empty candidate string marks the end of gathering.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// A call-control signal with its content decoded for the sub-kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    /// `None` is the end-of-candidates marker.
    Candidate(Option<IceCandidate>),
    Decline,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::Candidate(_) => SignalKind::Candidate,
            Signal::Decline => SignalKind::Decline,
        }
    }

    /// Interpret `content` according to `kind`.
    pub fn decode(kind: SignalKind, content: Option<&serde_json::Value>) -> Result<Self, CallError> {
        let content = content.filter(|v| !v.is_null());
        match kind {
            SignalKind::Offer | SignalKind::Answer => {
                let value = content.ok_or_else(|| {
                    CallError::Protocol(format!("{} without a session description", kind))
                })?;
                let desc = SessionDescription::deserialize(value)?;
                if kind == SignalKind::Offer {
                    Ok(Signal::Offer(desc))
                } else {
                    Ok(Signal::Answer(desc))
                }
            }
            SignalKind::Candidate => match content {
                None => Ok(Signal::Candidate(None)),
                Some(value) => Ok(Signal::Candidate(Some(IceCandidate::deserialize(value)?))),
            },
            SignalKind::Decline => Ok(Signal::Decline),
        }
    }

    pub fn to_wire(&self) -> Result<WireMessage, CallError> {
        let content = match self {
            Signal::Offer(desc) | Signal::Answer(desc) => Some(serde_json::to_value(desc)?),
            Signal::Candidate(Some(candidate)) => Some(serde_json::to_value(candidate)?),
            Signal::Candidate(None) => Some(serde_json::Value::Null),
            Signal::Decline => None,
        };
        Ok(WireMessage::WebRtcSignal {
            value: self.kind(),
            content,
        })
    }
}

/// Presence action reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceAction {
    Join,
    Leave,
    Timeout,
    StateChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub action: PresenceAction,
    pub uuid: String,
}

impl PresenceEvent {
    pub fn new(action: PresenceAction, uuid: impl Into<String>) -> Self {
        Self {
            action,
            uuid: uuid.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOccupancy {
    pub occupants: Vec<Occupant>,
}

/// Result of a presence query, keyed by channel name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceSnapshot {
    pub channels: HashMap<String, ChannelOccupancy>,
}

impl PresenceSnapshot {
    pub fn occupants(&self, channel: &str) -> impl Iterator<Item = &str> {
        self.channels
            .get(channel)
            .into_iter()
            .flat_map(|c| c.occupants.iter().map(|o| o.uuid.as_str()))
    }
}
