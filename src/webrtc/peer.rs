use super::{ConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerLink};
use crate::errors::CallError;
use crate::media::{MediaStream, RemoteTrack, TrackKind};
use crate::signal::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// WebRTC peer connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RTCConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
}

impl Default for RTCConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            ice_transport_policy: IceTransportPolicy::All,
            bundle_policy: BundlePolicy::MaxBundle,
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl From<IceServer> for webrtc::ice_transport::ice_server::RTCIceServer {
    fn from(server: IceServer) -> Self {
        webrtc::ice_transport::ice_server::RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// ICE transport policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IceTransportPolicy {
    Relay,
    All,
}

/// Bundle policy for RTC connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    MaxBundle,
}

impl From<&RTCConfiguration> for webrtc::peer_connection::configuration::RTCConfiguration {
    fn from(config: &RTCConfiguration) -> Self {
        webrtc::peer_connection::configuration::RTCConfiguration {
            ice_servers: config.ice_servers.iter().cloned().map(Into::into).collect(),
            ice_transport_policy: match config.ice_transport_policy {
                IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
                IceTransportPolicy::All => RTCIceTransportPolicy::All,
            },
            bundle_policy: match config.bundle_policy {
                BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
                BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
                BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
            },
            ..Default::default()
        }
    }
}

impl From<RTCIceConnectionState> for ConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => ConnectionState::New,
            RTCIceConnectionState::Checking => ConnectionState::Connecting,
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                ConnectionState::Connected
            }
            RTCIceConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCIceConnectionState::Failed => ConnectionState::Failed,
            RTCIceConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = CallError;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
            SdpType::Rollback => {
                return Err(CallError::Negotiation(
                    "Rollback descriptions are not supported".to_string(),
                ))
            }
        };
        parsed.map_err(|e| CallError::Negotiation(format!("Invalid session description: {}", e)))
    }
}

impl From<RTCSessionDescription> for SessionDescription {
    fn from(desc: RTCSessionDescription) -> Self {
        use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            RTCSdpType::Offer | RTCSdpType::Unspecified => SdpType::Offer,
        };
        SessionDescription {
            sdp_type,
            sdp: desc.sdp,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

fn track_kind(kind: RTPCodecType) -> TrackKind {
    match kind {
        RTPCodecType::Audio => TrackKind::Audio,
        _ => TrackKind::Video,
    }
}

/// Creates webrtc-rs peer connections with the default codecs and
/// interceptors registered.
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector;

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        config: &RTCConfiguration,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, CallError> {
        let peer = WebRtcPeer::new(config, events).await?;
        Ok(Box::new(peer))
    }
}

/// webrtc-rs peer connection reporting into a [`PeerEventSink`].
pub struct WebRtcPeer {
    id: String,
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcPeer {
    pub async fn new(config: &RTCConfiguration, events: PeerEventSink) -> Result<Self, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(config.into())
                .await
                .map_err(|e| CallError::Negotiation(format!("Failed to create peer connection: {}", e)))?,
        );

        let peer = Self {
            id: events.session().to_string(),
            peer_connection,
        };
        peer.attach_handlers(events);
        log::info!("Peer connection {} created", peer.id);
        Ok(peer)
    }

    fn attach_handlers(&self, events: PeerEventSink) {
        let pc = &self.peer_connection;

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let local = match candidate.map(|c| c.to_json()) {
                None => Some(None),
                Some(Ok(init)) => Some(Some(IceCandidate::from(init))),
                Some(Err(e)) => {
                    log::warn!("Dropping unserializable local candidate: {}", e);
                    None
                }
            };
            if let Some(local) = local {
                sink.emit(PeerEvent::LocalCandidate(local));
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_negotiation_needed(Box::new(move || {
            sink.emit(PeerEvent::NegotiationNeeded);
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            log::debug!("ICE connection state for {}: {}", sink.session(), state);
            sink.emit(PeerEvent::ConnectionState(state.into()));
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
            if state == RTCSignalingState::Closed {
                sink.emit(PeerEvent::ConnectionState(ConnectionState::Closed));
            }
            Box::pin(async {})
        }));

        let id = self.id.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            log::debug!("ICE gathering state for {}: {}", id, state);
            Box::pin(async {})
        }));

        let sink = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let remote = RemoteTrack::new(track.id(), track.stream_id(), track_kind(track.kind()));
                sink.emit(PeerEvent::TrackAdded(remote.clone()));

                let sink = sink.clone();
                tokio::spawn(async move {
                    while let Ok((packet, _)) = track.read_rtp().await {
                        remote.forward(packet.payload.clone());
                    }
                    sink.emit(PeerEvent::TrackRemoved {
                        track_id: remote.id.clone(),
                    });
                });
                Box::pin(async {})
            },
        ));
    }
}

#[async_trait]
impl PeerLink for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        log::info!("Creating SDP offer for peer {}", self.id);

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to set local description: {}", e)))?;

        Ok(offer.into())
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        log::info!("Creating SDP answer for peer {}", self.id);

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to set local description: {}", e)))?;

        Ok(answer.into())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        log::info!("Setting remote description for peer {}", self.id);

        let rtc_desc = RTCSessionDescription::try_from(desc)?;
        self.peer_connection
            .set_remote_description(rtc_desc)
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        log::debug!("Adding ICE candidate for peer {}: {}", self.id, candidate.candidate);

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), CallError> {
        for track in &stream.tracks {
            let local: Arc<dyn TrackLocal + Send + Sync> = track.sample_track();
            let sender = self
                .peer_connection
                .add_track(local)
                .await
                .map_err(|e| CallError::Negotiation(format!("Failed to add track {}: {}", track.id(), e)))?;

            // RTCP has to be drained for the interceptors to keep working.
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        log::info!(
            "Attached local stream {} ({} tracks) to peer {}",
            stream.id,
            stream.tracks.len(),
            self.id
        );
        Ok(())
    }

    async fn detach_handlers(&self) {
        let pc = &self.peer_connection;
        pc.on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
        pc.on_negotiation_needed(Box::new(|| Box::pin(async {})));
        pc.on_ice_connection_state_change(Box::new(|_: RTCIceConnectionState| Box::pin(async {})));
        pc.on_signaling_state_change(Box::new(|_: RTCSignalingState| Box::pin(async {})));
        pc.on_ice_gathering_state_change(Box::new(|_: RTCIceGathererState| Box::pin(async {})));
        pc.on_track(Box::new(
            |_: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                Box::pin(async {})
            },
        ));
        log::debug!("Detached handlers from peer {}", self.id);
    }

    async fn close(&self) -> Result<(), CallError> {
        log::info!("Closing peer connection {}", self.id);

        self.peer_connection
            .close()
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to close peer connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallEvent, SessionToken};
    use tokio::sync::mpsc;

    fn sink() -> (PeerEventSink, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerEventSink::new(SessionToken(1), tx), rx)
    }

    #[test]
    fn test_default_configuration_uses_public_stun() {
        let config = RTCConfiguration::default();
        assert_eq!(config.ice_servers.len(), 1);
        assert!(config.ice_servers[0].urls[0].starts_with("stun:"));
    }

    #[test]
    fn test_rollback_is_rejected() {
        let desc = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(RTCSessionDescription::try_from(desc).is_err());
    }

    #[tokio::test]
    async fn test_offer_commits_local_description() {
        let (events, _rx) = sink();
        let peer = WebRtcPeer::new(&RTCConfiguration::default(), events).await.unwrap();
        peer.peer_connection
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();

        let offer = peer.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("v=0"));
        assert!(peer.peer_connection.local_description().await.is_some());

        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_two_peers_exchange_descriptions() {
        let (a_events, _a_rx) = sink();
        let (b_events, _b_rx) = sink();
        let a = WebRtcPeer::new(&RTCConfiguration { ice_servers: vec![], ..Default::default() }, a_events)
            .await
            .unwrap();
        let b = WebRtcPeer::new(&RTCConfiguration { ice_servers: vec![], ..Default::default() }, b_events)
            .await
            .unwrap();

        let stream = MediaStream::for_constraints(&crate::media::MediaConstraints::default());
        a.add_local_stream(&stream).await.unwrap();

        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        a.set_remote_description(answer).await.unwrap();

        a.detach_handlers().await;
        a.close().await.unwrap();
        b.close().await.unwrap();
    }
}
