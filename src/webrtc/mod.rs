//! Peer connection backend.
//!
//! The call state machine drives a [`PeerLink`] and learns about everything
//! the connection does on its own (gathered candidates, negotiation needed,
//! connectivity changes, remote tracks) through [`PeerEvent`]s posted to a
//! [`PeerEventSink`]. The production backend is built on webrtc-rs.

pub mod peer;

use crate::call::{CallEvent, SessionToken};
use crate::errors::CallError;
use crate::media::{MediaStream, RemoteTrack};
use crate::signal::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

pub use peer::{BundlePolicy, IceServer, IceTransportPolicy, RTCConfiguration, WebRtcConnector};

/// Connectivity of the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the call cannot continue.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// Something the peer connection did on its own.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered; `None` marks the end of gathering.
    LocalCandidate(Option<IceCandidate>),
    NegotiationNeeded,
    ConnectionState(ConnectionState),
    TrackAdded(RemoteTrack),
    TrackRemoved { track_id: String },
}

/// Posts peer events for one call session into the call event queue.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    session: SessionToken,
    tx: UnboundedSender<CallEvent>,
}

impl PeerEventSink {
    pub fn new(session: SessionToken, tx: UnboundedSender<CallEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionToken {
        self.session
    }

    pub fn emit(&self, event: PeerEvent) {
        if self
            .tx
            .send(CallEvent::Peer {
                session: self.session,
                event,
            })
            .is_err()
        {
            log::debug!("Call event queue closed, dropping peer event for {}", self.session);
        }
    }
}

/// One live peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer and commit it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    /// Create an answer and commit it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), CallError>;

    /// Stop reporting events. Called first during teardown.
    async fn detach_handlers(&self);

    async fn close(&self) -> Result<(), CallError>;
}

/// Allocates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        config: &RTCConfiguration,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, CallError>;
}
