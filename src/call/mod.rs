//! Call negotiation state machine.
//!
//! One [`CallStateMachine`] owns at most one call session at a time and
//! drives it through the offer/answer exchange:
//!
//! ```text
//! Idle ──create_session──▶ Negotiating(Awaiting)
//!   caller: start_call ─▶ media ─▶ negotiation needed ─▶ Offering ─answer─▶ Connected
//!   callee: offer ─▶ Answering ─confirm─▶ remote description, media, answer ─▶ Connected
//! any ──decline / failure / hang-up / transport loss──▶ Closed
//! ```
//!
//! Signals that arrive with no call only bind a channel ([`CallStateMachine::bind_channel`]):
//! early candidates wait there, and no peer connection exists until an offer
//! comes in or a call is placed.
//!
//! Everything that may take a while (media acquisition, the user's answer to
//! an incoming call, peer connection callbacks) comes back as a
//! [`CallEvent`] tagged with the [`SessionToken`] it belongs to. Events for a
//! session that has since been torn down are discarded.

mod queue;
mod state;

pub use queue::CandidateQueue;
pub use state::{CallState, Negotiation};

use crate::assert_invariant;
use crate::errors::CallError;
use crate::media::{MediaConstraints, MediaDevices, MediaStream, RemoteTrack};
use crate::signal::{IceCandidate, SessionDescription, Signal};
use crate::transport::SignalingTransport;
use crate::ui::CallUi;
use crate::webrtc::{PeerConnector, PeerEvent, PeerEventSink, PeerLink, RTCConfiguration};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};

/// Liveness token of one call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(pub u64);

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Why local media was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPurpose {
    /// We are placing the call.
    Outgoing,
    /// We accepted a remote offer.
    Answer,
}

/// Completion of something the machine was waiting on.
#[derive(Debug)]
pub enum CallEvent {
    Peer {
        session: SessionToken,
        event: PeerEvent,
    },
    MediaAcquired {
        session: SessionToken,
        purpose: MediaPurpose,
        result: Result<MediaStream, CallError>,
    },
    CallConfirmed {
        session: SessionToken,
        caller: String,
        offer: SessionDescription,
        accepted: bool,
    },
}

impl CallEvent {
    pub fn session(&self) -> SessionToken {
        match self {
            CallEvent::Peer { session, .. }
            | CallEvent::MediaAcquired { session, .. }
            | CallEvent::CallConfirmed { session, .. } => *session,
        }
    }
}

/// External services the machine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn SignalingTransport>,
    pub ui: Arc<dyn CallUi>,
    pub media: Arc<dyn MediaDevices>,
    pub connector: Arc<dyn PeerConnector>,
}

struct CallSession {
    token: SessionToken,
    channel: String,
    /// `None` while the session is only a channel binding.
    link: Option<Box<dyn PeerLink>>,
    /// Set once a remote offer was taken up; an answering session never offers.
    answered: bool,
    remote_description_set: bool,
    candidates: CandidateQueue,
    local_stream: Option<MediaStream>,
    remote_tracks: Vec<RemoteTrack>,
}

impl CallSession {
    fn new(token: SessionToken, channel: &str) -> Self {
        Self {
            token,
            channel: channel.to_string(),
            link: None,
            answered: false,
            remote_description_set: false,
            candidates: CandidateQueue::new(),
            local_stream: None,
            remote_tracks: Vec::new(),
        }
    }

    fn link(&self) -> Result<&dyn PeerLink, CallError> {
        self.link.as_deref().ok_or(CallError::NoSession)
    }
}

pub struct CallStateMachine {
    collab: Collaborators,
    rtc_config: RTCConfiguration,
    constraints: MediaConstraints,
    state: CallState,
    session: Option<CallSession>,
    next_token: u64,
    events_tx: UnboundedSender<CallEvent>,
    events_rx: UnboundedReceiver<CallEvent>,
}

impl CallStateMachine {
    pub fn new(collab: Collaborators, rtc_config: RTCConfiguration, constraints: MediaConstraints) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            collab,
            rtc_config,
            constraints,
            state: CallState::Idle,
            session: None,
            next_token: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Whether a call with a peer connection currently exists.
    pub fn is_ongoing(&self) -> bool {
        self.active_session().is_some()
    }

    pub fn active_session(&self) -> Option<SessionToken> {
        self.session
            .as_ref()
            .filter(|s| s.link.is_some())
            .map(|s| s.token)
    }

    pub fn channel(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.channel.as_str())
    }

    pub fn queued_candidates(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.candidates.len())
    }

    fn is_live(&self, token: SessionToken) -> bool {
        self.session.as_ref().map(|s| s.token) == Some(token)
    }

    fn issue_token(&mut self) -> SessionToken {
        self.next_token += 1;
        SessionToken(self.next_token)
    }

    async fn connect(&self, token: SessionToken) -> Result<Box<dyn PeerLink>, CallError> {
        let sink = PeerEventSink::new(token, self.events_tx.clone());
        self.collab.connector.connect(&self.rtc_config, sink).await
    }

    /// Bind `channel` for remote signals that arrive while no call exists.
    ///
    /// Candidates are held until an offer opens the call. No peer connection
    /// is allocated, so a stray signal never blocks the next call. No-op when
    /// a session or binding already exists.
    pub fn bind_channel(&mut self, channel: &str) {
        if self.session.is_some() {
            return;
        }
        let token = self.issue_token();
        self.session = Some(CallSession::new(token, channel));
        log::debug!("Bound {} to channel {}", token, channel);
    }

    /// Allocate a peer connection bound to `channel`.
    ///
    /// Replaces a channel binding that never became a call.
    pub async fn create_session(&mut self, channel: &str) -> Result<SessionToken, CallError> {
        if let Some(session) = self.session.as_ref().filter(|s| s.link.is_some()) {
            log::warn!(
                "Call has already started ({} on {}), not creating another",
                session.token,
                session.channel
            );
            return Err(CallError::SessionActive(session.channel.clone()));
        }
        if let Some(stale) = self.session.take() {
            log::debug!(
                "Dropping {} on {} with {} unused candidates",
                stale.token,
                stale.channel,
                stale.candidates.len()
            );
        }

        let token = self.issue_token();
        let link = self.connect(token).await?;
        let mut session = CallSession::new(token, channel);
        session.link = Some(link);

        self.session = Some(session);
        self.state = CallState::Negotiating(Negotiation::Awaiting);
        log::info!("Created {} on channel {}", token, channel);
        Ok(token)
    }

    /// Acquire local media for an outgoing call.
    ///
    /// The result comes back as a [`CallEvent::MediaAcquired`]; attaching it
    /// makes the peer connection ask for negotiation, which sends the offer.
    pub fn start_call(&mut self) -> Result<(), CallError> {
        let token = self.active_session().ok_or(CallError::NoSession)?;
        log::info!("Starting outgoing {}", token);
        self.spawn_media(token, MediaPurpose::Outgoing);
        Ok(())
    }

    fn spawn_media(&self, session: SessionToken, purpose: MediaPurpose) {
        let media = Arc::clone(&self.collab.media);
        let constraints = self.constraints;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = media.acquire(&constraints).await;
            if let Err(SendError(CallEvent::MediaAcquired { result: Ok(stream), .. })) =
                tx.send(CallEvent::MediaAcquired {
                    session,
                    purpose,
                    result,
                })
            {
                stream.stop_all();
            }
        });
    }

    /// Next pending completion, waiting if there is none yet.
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        self.events_rx.recv().await
    }

    /// Next pending completion, if one is already queued.
    pub fn try_next_event(&mut self) -> Option<CallEvent> {
        self.events_rx.try_recv().ok()
    }

    pub async fn handle_event(&mut self, event: CallEvent) {
        let token = event.session();
        if !self.is_live(token) {
            log::debug!("Discarding late event for {}", token);
            if let CallEvent::MediaAcquired { result: Ok(stream), .. } = event {
                stream.stop_all();
            }
            return;
        }

        match event {
            CallEvent::Peer { event, .. } => self.on_peer_event(event).await,
            CallEvent::MediaAcquired { purpose, result, .. } => self.on_media(purpose, result).await,
            CallEvent::CallConfirmed {
                caller,
                offer,
                accepted,
                ..
            } => self.on_confirmation(&caller, offer, accepted).await,
        }
    }

    /// Apply a call-control signal from a remote participant.
    pub async fn handle_signal(&mut self, signal: Signal, sender: &str) {
        log::debug!("Handling {} from {}", signal.kind(), sender);
        match signal {
            Signal::Offer(offer) => self.on_offer(offer, sender).await,
            Signal::Answer(answer) => self.on_answer(answer).await,
            Signal::Candidate(candidate) => self.on_remote_candidate(candidate).await,
            Signal::Decline => self.on_decline(sender).await,
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription, caller: &str) {
        let Some((token, bound_only)) = self
            .session
            .as_ref()
            .map(|s| (s.token, s.link.is_none()))
        else {
            log::warn!("Offer from {} without a call session, ignoring", caller);
            return;
        };
        if !bound_only && self.state != CallState::Negotiating(Negotiation::Awaiting) {
            log::warn!("Offer from {} while {}, ignoring", caller, self.state);
            return;
        }

        if bound_only {
            let result = self.connect(token).await;
            match result {
                Ok(link) => {
                    if let Some(session) = self.session.as_mut() {
                        session.link = Some(link);
                    }
                }
                Err(e) => {
                    self.fail_call(e).await;
                    return;
                }
            }
        }
        if let Some(session) = self.session.as_mut() {
            session.answered = true;
        }

        self.state = CallState::Negotiating(Negotiation::Answering);
        log::info!("{} is calling on {}", caller, token);

        let ui = Arc::clone(&self.collab.ui);
        let tx = self.events_tx.clone();
        let caller = caller.to_string();
        tokio::spawn(async move {
            let accepted = ui.confirm_call(&caller).await;
            let _ = tx.send(CallEvent::CallConfirmed {
                session: token,
                caller,
                offer,
                accepted,
            });
        });
    }

    async fn on_confirmation(&mut self, caller: &str, offer: SessionDescription, accepted: bool) {
        if !accepted {
            log::info!("Declining call from {}", caller);
            self.publish(Signal::Decline).await;
            self.hang_up().await;
            return;
        }

        if let Err(e) = self.accept_remote_description(offer).await {
            self.fail_call(e).await;
            return;
        }
        if let Some(token) = self.active_session() {
            self.spawn_media(token, MediaPurpose::Answer);
        }
    }

    async fn on_media(&mut self, purpose: MediaPurpose, result: Result<MediaStream, CallError>) {
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                self.fail_call(e).await;
                return;
            }
        };

        let ui = Arc::clone(&self.collab.ui);
        let Some(session) = self.session.as_mut() else {
            stream.stop_all();
            return;
        };

        ui.attach_local_stream(&stream);
        session.local_stream = Some(stream.clone());
        let result = match session.link() {
            Ok(link) => link.add_local_stream(&stream).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.fail_call(e).await;
            return;
        }
        ui.set_hang_up_enabled(true);

        if purpose == MediaPurpose::Answer {
            self.send_answer().await;
        }
    }

    async fn send_answer(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let token = session.token;
        let result = match session.link() {
            Ok(link) => link.create_answer().await,
            Err(e) => Err(e),
        };
        let answer = match result {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_call(e).await;
                return;
            }
        };
        self.publish(Signal::Answer(answer)).await;
        self.state = CallState::Connected;
        log::info!("{} connected (answered)", token);
    }

    /// Offer once, from a session that is still waiting for its first
    /// description. Negotiation-needed raised by an answering session or
    /// after the exchange completed is ignored.
    async fn send_offer(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.answered || self.state != CallState::Negotiating(Negotiation::Awaiting) {
            log::debug!("Negotiation needed while {}, ignoring", self.state);
            return;
        }
        let result = match session.link() {
            Ok(link) => link.create_offer().await,
            Err(e) => Err(e),
        };
        let offer = match result {
            Ok(offer) => offer,
            Err(e) => {
                self.fail_call(e).await;
                return;
            }
        };
        self.publish(Signal::Offer(offer)).await;
        self.state = CallState::Negotiating(Negotiation::Offering);
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        if self.state != CallState::Negotiating(Negotiation::Offering) {
            log::debug!("Answer while {}, ignoring", self.state);
            return;
        }
        if let Err(e) = self.accept_remote_description(answer).await {
            self.fail_call(e).await;
            return;
        }
        self.state = CallState::Connected;
        if let Some(token) = self.active_session() {
            log::info!("{} connected (offered)", token);
        }
    }

    /// Set the remote description and, the first time, apply every
    /// candidate that was waiting for it.
    async fn accept_remote_description(&mut self, desc: SessionDescription) -> Result<(), CallError> {
        let session = self.session.as_mut().ok_or(CallError::NoSession)?;
        session.link()?.set_remote_description(desc).await?;

        if session.remote_description_set {
            return Ok(());
        }
        session.remote_description_set = true;

        let queued = session.candidates.drain();
        if !queued.is_empty() {
            log::debug!("Applying {} queued candidates to {}", queued.len(), session.token);
        }
        for candidate in queued {
            session.link()?.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: Option<IceCandidate>) {
        let Some(candidate) = candidate.filter(|c| !c.is_end_of_candidates()) else {
            log::debug!("End of remote candidates");
            return;
        };
        let Some(session) = self.session.as_mut() else {
            log::debug!("Candidate without a call session, ignoring");
            return;
        };

        if !session.remote_description_set {
            assert_invariant!(
                !session.candidates.is_flushed(),
                "Candidates only wait while the remote description is unset",
                "call::candidate"
            );
            session.candidates.push(candidate);
            return;
        }

        let result = match session.link() {
            Ok(link) => link.add_ice_candidate(candidate).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.fail_call(e).await;
        }
    }

    async fn on_decline(&mut self, by: &str) {
        if self.session.is_none() {
            log::debug!("Decline from {} without a call session, ignoring", by);
            return;
        }
        log::info!("{} declined the call", by);
        self.collab.ui.notify_declined(by);
        self.close_call().await;
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.publish(Signal::Candidate(candidate)).await;
            }
            PeerEvent::NegotiationNeeded => self.send_offer().await,
            PeerEvent::ConnectionState(state) => {
                log::debug!("Peer connection state: {:?}", state);
                if state.is_terminal() {
                    log::warn!("Peer connection {:?}, hanging up", state);
                    self.hang_up().await;
                }
            }
            PeerEvent::TrackAdded(track) => {
                self.collab.ui.attach_remote_track(&track);
                if let Some(session) = self.session.as_mut() {
                    session.remote_tracks.push(track);
                }
            }
            PeerEvent::TrackRemoved { track_id } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let before = session.remote_tracks.len();
                session.remote_tracks.retain(|t| t.id != track_id);
                if session.remote_tracks.len() < before && session.remote_tracks.is_empty() {
                    log::info!("Last remote track ended, hanging up");
                    self.hang_up().await;
                }
            }
        }
    }

    async fn publish(&self, signal: Signal) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let kind = signal.kind();
        let result = match signal.to_wire() {
            Ok(message) => self.collab.transport.publish(&message, &session.channel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log::warn!("Failed to publish {} on {}: {}", kind, session.channel, e);
        }
    }

    async fn fail_call(&mut self, error: CallError) {
        log::error!("Call failed: {}", error);
        self.collab.ui.report_call_failure(&error.to_string());
        self.hang_up().await;
    }

    /// Hide the call surface and tear the call down.
    pub async fn hang_up(&mut self) {
        self.collab.ui.hide_call_surface();
        self.close_call().await;
    }

    /// Tear down the current session, if any.
    ///
    /// Handlers are detached before anything is released so no callback can
    /// observe a half-closed session. Safe to call repeatedly.
    pub async fn close_call(&mut self) {
        let Some(session) = self.session.take() else {
            self.state = CallState::Closed;
            return;
        };

        if let Some(link) = &session.link {
            link.detach_handlers().await;
            if let Err(e) = link.close().await {
                log::warn!("Error closing {}: {}", session.token, e);
            }
        }
        if let Some(stream) = &session.local_stream {
            stream.stop_all();
        }

        let ui = &self.collab.ui;
        ui.clear_remote_stream();
        ui.clear_local_stream();
        ui.set_hang_up_enabled(false);

        self.state = CallState::Closed;
        log::info!("{} closed", session.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariant_ppt::contract_test;
    use crate::signal::WireMessage;
    use crate::testing::{FakeConnector, FakeMedia, LinkCall, RecordingTransport, RecordingUi, UiCall};
    use crate::webrtc::ConnectionState;

    struct Harness {
        machine: CallStateMachine,
        connector: Arc<FakeConnector>,
        transport: Arc<RecordingTransport>,
        ui: Arc<RecordingUi>,
        media: Arc<FakeMedia>,
    }

    fn harness() -> Harness {
        let connector = Arc::new(FakeConnector::default());
        let transport = Arc::new(RecordingTransport::new("me"));
        let ui = Arc::new(RecordingUi::default());
        let media = Arc::new(FakeMedia::default());
        let machine = CallStateMachine::new(
            Collaborators {
                transport: transport.clone(),
                ui: ui.clone(),
                media: media.clone(),
                connector: connector.clone(),
            },
            RTCConfiguration::default(),
            MediaConstraints::default(),
        );
        Harness {
            machine,
            connector,
            transport,
            ui,
            media,
        }
    }

    async fn pump(machine: &mut CallStateMachine) {
        let event = machine.next_event().await.expect("event queue open");
        machine.handle_event(event).await;
    }

    async fn drain(machine: &mut CallStateMachine) {
        tokio::task::yield_now().await;
        while let Some(event) = machine.try_next_event() {
            machine.handle_event(event).await;
            tokio::task::yield_now().await;
        }
    }

    fn candidate(n: u32) -> Signal {
        Signal::Candidate(Some(IceCandidate::new(format!("candidate:{}", n))))
    }

    #[tokio::test]
    async fn test_outgoing_call_publishes_offer() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.machine.start_call().unwrap();

        pump(&mut h.machine).await; // media
        pump(&mut h.machine).await; // negotiation needed

        assert_eq!(h.machine.state(), CallState::Negotiating(Negotiation::Offering));
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0].0,
            WireMessage::WebRtcSignal { value: crate::signal::SignalKind::Offer, .. }
        ));
        assert!(h.ui.calls().contains(&UiCall::HangUpEnabled(true)));

        h.connector.last_link().emit(PeerEvent::NegotiationNeeded);
        pump(&mut h.machine).await;
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_second_session_is_rejected() {
        let mut h = harness();
        let first = h.machine.create_session("room").await.unwrap();
        let err = h.machine.create_session("other").await.unwrap_err();

        assert!(matches!(err, CallError::SessionActive(_)));
        assert_eq!(h.machine.active_session(), Some(first));
        assert_eq!(h.machine.channel(), Some("room"));
        assert_eq!(h.connector.links_created(), 1);
    }

    #[tokio::test]
    async fn test_candidates_queue_until_answer() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.machine.start_call().unwrap();
        pump(&mut h.machine).await;
        pump(&mut h.machine).await;

        h.machine.handle_signal(candidate(1), "bob").await;
        h.machine.handle_signal(candidate(2), "bob").await;
        assert_eq!(h.machine.queued_candidates(), 2);
        assert!(h.connector.last_link().applied_candidates().is_empty());

        h.machine
            .handle_signal(Signal::Answer(SessionDescription::answer("v=0")), "bob")
            .await;
        h.machine.handle_signal(candidate(3), "bob").await;

        assert_eq!(h.machine.state(), CallState::Connected);
        assert_eq!(
            h.connector.last_link().applied_candidates(),
            vec!["candidate:1", "candidate:2", "candidate:3"]
        );
        contract_test(
            "candidate queue",
            &[
                "Candidates only wait while the remote description is unset",
                "The candidate queue is flushed at most once",
            ],
        );
    }

    #[tokio::test]
    async fn test_end_of_candidates_marker_is_ignored() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.machine.handle_signal(Signal::Candidate(None), "bob").await;
        h.machine
            .handle_signal(Signal::Candidate(Some(IceCandidate::new(""))), "bob")
            .await;
        assert_eq!(h.machine.queued_candidates(), 0);
    }

    #[tokio::test]
    async fn test_answer_outside_offering_is_absorbed() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.machine
            .handle_signal(Signal::Answer(SessionDescription::answer("v=0")), "bob")
            .await;
        assert_eq!(h.machine.state(), CallState::Negotiating(Negotiation::Awaiting));
        assert!(h.connector.last_link().remote_description().is_none());
    }

    #[tokio::test]
    async fn test_accepted_offer_answers_and_flushes() {
        let mut h = harness();
        h.ui.set_answer(true);
        h.machine.create_session("room").await.unwrap();
        h.machine.handle_signal(candidate(7), "alice").await;
        h.machine
            .handle_signal(Signal::Offer(SessionDescription::offer("v=0")), "alice")
            .await;
        assert_eq!(h.machine.state(), CallState::Negotiating(Negotiation::Answering));

        pump(&mut h.machine).await; // confirmation
        assert_eq!(h.connector.last_link().applied_candidates(), vec!["candidate:7"]);
        pump(&mut h.machine).await; // media

        assert_eq!(h.machine.state(), CallState::Connected);
        assert!(h.ui.calls().contains(&UiCall::Confirm("alice".into())));
        assert!(h.ui.calls().contains(&UiCall::LocalStream));
        let link = h.connector.last_link();
        let calls = link.calls();
        let remote = calls.iter().position(|c| matches!(c, LinkCall::SetRemote(_))).unwrap();
        let answer = calls.iter().position(|c| matches!(c, LinkCall::CreateAnswer)).unwrap();
        assert!(remote < answer);

        // Attaching media raised negotiation-needed; the answerer must not offer.
        drain(&mut h.machine).await;
        assert_eq!(h.machine.state(), CallState::Connected);
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0].0,
            WireMessage::WebRtcSignal { value: crate::signal::SignalKind::Answer, .. }
        ));
        assert!(!link.calls().contains(&LinkCall::CreateOffer));
    }

    #[tokio::test]
    async fn test_bound_channel_does_not_block_a_new_call() {
        let mut h = harness();
        h.machine.bind_channel("room");
        h.machine.handle_signal(candidate(1), "bob").await;
        h.machine.handle_signal(Signal::Candidate(None), "bob").await;
        h.machine
            .handle_signal(Signal::Answer(SessionDescription::answer("v=0")), "bob")
            .await;

        assert!(!h.machine.is_ongoing());
        assert_eq!(h.machine.state(), CallState::Idle);
        assert_eq!(h.machine.channel(), Some("room"));
        assert_eq!(h.machine.queued_candidates(), 1);
        assert_eq!(h.connector.links_created(), 0);

        let token = h.machine.create_session("room").await.unwrap();
        assert_eq!(h.machine.active_session(), Some(token));
        assert_eq!(h.machine.queued_candidates(), 0);
        assert_eq!(h.connector.links_created(), 1);
    }

    #[tokio::test]
    async fn test_offer_on_bound_channel_opens_the_call() {
        let mut h = harness();
        h.machine.bind_channel("room");
        h.machine.handle_signal(candidate(4), "alice").await;
        h.machine
            .handle_signal(Signal::Offer(SessionDescription::offer("v=0")), "alice")
            .await;

        assert!(h.machine.is_ongoing());
        assert_eq!(h.machine.state(), CallState::Negotiating(Negotiation::Answering));
        assert_eq!(h.connector.links_created(), 1);

        pump(&mut h.machine).await; // confirmation
        assert_eq!(h.connector.last_link().applied_candidates(), vec!["candidate:4"]);
        pump(&mut h.machine).await; // media
        drain(&mut h.machine).await;

        assert_eq!(h.machine.state(), CallState::Connected);
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_offer_sends_decline_and_closes() {
        let mut h = harness();
        h.ui.set_answer(false);
        h.machine.create_session("room").await.unwrap();
        h.machine
            .handle_signal(Signal::Offer(SessionDescription::offer("v=0")), "alice")
            .await;
        pump(&mut h.machine).await;

        assert_eq!(h.machine.state(), CallState::Closed);
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Signal::Decline.to_wire().unwrap());
        assert!(h.connector.last_link().is_closed());
    }

    #[tokio::test]
    async fn test_decline_closes_and_notifies() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.machine.handle_signal(candidate(1), "bob").await;
        h.machine.handle_signal(Signal::Decline, "bob").await;

        assert_eq!(h.machine.state(), CallState::Closed);
        assert!(h.ui.calls().contains(&UiCall::Declined("bob".into())));
        assert!(h.connector.last_link().applied_candidates().is_empty());
    }

    #[tokio::test]
    async fn test_media_failure_closes_without_offer() {
        let mut h = harness();
        h.media.fail_next("camera busy");
        h.machine.create_session("room").await.unwrap();
        h.machine.start_call().unwrap();
        pump(&mut h.machine).await;
        drain(&mut h.machine).await;

        assert_eq!(h.machine.state(), CallState::Closed);
        assert!(h.transport.sent().is_empty());
        assert!(h
            .ui
            .calls()
            .iter()
            .any(|c| matches!(c, UiCall::Failure(reason) if reason.contains("camera busy"))));
    }

    #[tokio::test]
    async fn test_late_media_after_hang_up_is_discarded() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.machine.start_call().unwrap();
        h.machine.hang_up().await;

        pump(&mut h.machine).await;

        assert_eq!(h.machine.state(), CallState::Closed);
        assert!(h.transport.sent().is_empty());
        let streams = h.media.acquired();
        assert_eq!(streams.len(), 1);
        assert!(streams[0].tracks.iter().all(|t| t.is_stopped()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut h = harness();
        h.machine.close_call().await;
        assert_eq!(h.machine.state(), CallState::Closed);

        h.machine.create_session("room").await.unwrap();
        h.machine.close_call().await;
        h.machine.close_call().await;
        assert_eq!(h.machine.state(), CallState::Closed);

        let link = h.connector.last_link();
        assert_eq!(link.calls()[..2], [LinkCall::DetachHandlers, LinkCall::Close]);
        assert_eq!(link.close_count(), 1);

        h.machine.create_session("room").await.unwrap();
        assert_eq!(h.machine.state(), CallState::Negotiating(Negotiation::Awaiting));
    }

    #[tokio::test]
    async fn test_terminal_connection_state_hangs_up() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.connector
            .last_link()
            .emit(PeerEvent::ConnectionState(ConnectionState::Failed));
        pump(&mut h.machine).await;

        assert_eq!(h.machine.state(), CallState::Closed);
        assert!(h.ui.calls().contains(&UiCall::HideSurface));
    }

    #[tokio::test]
    async fn test_last_remote_track_removed_hangs_up() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        let link = h.connector.last_link();
        link.emit(PeerEvent::TrackAdded(RemoteTrack::new("a", "s", crate::media::TrackKind::Audio)));
        link.emit(PeerEvent::TrackAdded(RemoteTrack::new("v", "s", crate::media::TrackKind::Video)));
        link.emit(PeerEvent::TrackRemoved { track_id: "a".into() });
        for _ in 0..3 {
            pump(&mut h.machine).await;
        }
        assert!(h.machine.is_ongoing());

        link.emit(PeerEvent::TrackRemoved { track_id: "v".into() });
        pump(&mut h.machine).await;
        assert_eq!(h.machine.state(), CallState::Closed);
    }

    #[tokio::test]
    async fn test_local_candidates_are_published() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.connector
            .last_link()
            .emit(PeerEvent::LocalCandidate(Some(IceCandidate::new("candidate:9"))));
        pump(&mut h.machine).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "room");
    }

    #[tokio::test]
    async fn test_rejected_remote_description_tears_down() {
        let mut h = harness();
        h.machine.create_session("room").await.unwrap();
        h.machine.start_call().unwrap();
        pump(&mut h.machine).await;
        pump(&mut h.machine).await;

        h.connector.last_link().reject_remote_descriptions();
        h.machine
            .handle_signal(Signal::Answer(SessionDescription::answer("bogus")), "bob")
            .await;

        assert_eq!(h.machine.state(), CallState::Closed);
    }
}
