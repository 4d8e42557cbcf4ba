//! Recording doubles for the collaborator boundaries
//!
//! Each double records what it was asked to do and can be told to fail, so
//! tests can assert on the exact sequence of effects a session produced.

use crate::errors::CallError;
use crate::media::{MediaConstraints, MediaDevices, MediaStream, RemoteTrack};
use crate::signal::{IceCandidate, PresenceSnapshot, SessionDescription, WireMessage};
use crate::transport::{ListenerId, SignalingTransport, SubscribeOptions, TransportEvent};
use crate::ui::{CallUi, ChatLine};
use crate::webrtc::{PeerConnector, PeerEvent, PeerEventSink, PeerLink, RTCConfiguration};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One request made of the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCall {
    RevealSurface,
    HideSurface,
    Chat { from: String, text: String },
    RosterAdd(String),
    RosterRemove(String),
    LocalStream,
    RemoteTrack(String),
    ClearLocal,
    ClearRemote,
    HangUpEnabled(bool),
    Declined(String),
    Failure(String),
    Confirm(String),
}

/// UI that records every request and answers calls with a fixed choice.
#[derive(Debug)]
pub struct RecordingUi {
    calls: Mutex<Vec<UiCall>>,
    answer: AtomicBool,
}

impl Default for RecordingUi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            answer: AtomicBool::new(true),
        }
    }
}

impl RecordingUi {
    pub fn new(answer: bool) -> Self {
        let ui = Self::default();
        ui.set_answer(answer);
        ui
    }

    pub fn set_answer(&self, accept: bool) {
        self.answer.store(accept, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<UiCall> {
        lock(&self.calls).clone()
    }

    /// Chat lines shown so far as `(from, text)` pairs.
    pub fn chat_lines(&self) -> Vec<(String, String)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                UiCall::Chat { from, text } => Some((from.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: UiCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl CallUi for RecordingUi {
    fn reveal_call_surface(&self) {
        self.record(UiCall::RevealSurface);
    }

    fn hide_call_surface(&self) {
        self.record(UiCall::HideSurface);
    }

    fn append_chat(&self, line: &ChatLine) {
        self.record(UiCall::Chat {
            from: line.from.clone(),
            text: line.text.clone(),
        });
    }

    fn add_roster_entry(&self, id: &str) {
        self.record(UiCall::RosterAdd(id.to_string()));
    }

    fn remove_roster_entry(&self, id: &str) {
        self.record(UiCall::RosterRemove(id.to_string()));
    }

    fn attach_local_stream(&self, _stream: &MediaStream) {
        self.record(UiCall::LocalStream);
    }

    fn attach_remote_track(&self, track: &RemoteTrack) {
        self.record(UiCall::RemoteTrack(track.id.clone()));
    }

    fn clear_local_stream(&self) {
        self.record(UiCall::ClearLocal);
    }

    fn clear_remote_stream(&self) {
        self.record(UiCall::ClearRemote);
    }

    fn set_hang_up_enabled(&self, enabled: bool) {
        self.record(UiCall::HangUpEnabled(enabled));
    }

    fn notify_declined(&self, by: &str) {
        self.record(UiCall::Declined(by.to_string()));
    }

    fn report_call_failure(&self, reason: &str) {
        self.record(UiCall::Failure(reason.to_string()));
    }

    async fn confirm_call(&self, caller: &str) -> bool {
        self.record(UiCall::Confirm(caller.to_string()));
        self.answer.load(Ordering::SeqCst)
    }
}

/// Transport that records publishes and lets tests inject inbound events.
#[derive(Default)]
pub struct RecordingTransport {
    id: String,
    sent: Mutex<Vec<(WireMessage, String)>>,
    subscribed: Mutex<Vec<String>>,
    listeners: Mutex<Vec<(ListenerId, UnboundedSender<TransportEvent>)>>,
    presence: Mutex<PresenceSnapshot>,
    next_listener: AtomicU64,
    fail_publish: AtomicBool,
    disconnected: AtomicBool,
}

impl RecordingTransport {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Every `(message, channel)` pair published so far.
    pub fn sent(&self) -> Vec<(WireMessage, String)> {
        lock(&self.sent).clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        lock(&self.subscribed).clone()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn set_presence(&self, snapshot: PresenceSnapshot) {
        *lock(&self.presence) = snapshot;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Deliver `event` to every registered listener.
    pub fn inject(&self, event: TransportEvent) {
        for (_, sink) in lock(&self.listeners).iter() {
            let _ = sink.send(event.clone());
        }
    }
}

#[async_trait]
impl SignalingTransport for RecordingTransport {
    async fn subscribe(&self, channels: &[String], _options: SubscribeOptions) -> Result<(), CallError> {
        lock(&self.subscribed).extend(channels.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, channels: &[String]) -> Result<(), CallError> {
        lock(&self.subscribed).retain(|c| !channels.contains(c));
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<(), CallError> {
        lock(&self.subscribed).clear();
        Ok(())
    }

    async fn publish(&self, message: &WireMessage, channel: &str) -> Result<(), CallError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(CallError::Transport("publish refused".to_string()));
        }
        lock(&self.sent).push((message.clone(), channel.to_string()));
        Ok(())
    }

    fn local_id(&self) -> String {
        self.id.clone()
    }

    async fn query_presence(&self, _channels: &[String]) -> Result<PresenceSnapshot, CallError> {
        Ok(lock(&self.presence).clone())
    }

    fn add_listener(&self, sink: UnboundedSender<TransportEvent>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, sink));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(listener, _)| *listener != id);
    }

    async fn disconnect(&self) -> Result<(), CallError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One request made of a fake peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    CreateOffer,
    CreateAnswer,
    SetRemote(SessionDescription),
    AddCandidate(String),
    AddStream(String),
    DetachHandlers,
    Close,
}

struct LinkState {
    calls: Vec<LinkCall>,
    remote: Option<SessionDescription>,
    candidates: Vec<String>,
    detached: bool,
    reject_remote: bool,
    reject_candidates: bool,
}

/// Peer connection double.
///
/// Clones share state, so the handle a test holds sees everything the call
/// machine did through its boxed copy.
#[derive(Clone)]
pub struct FakeLink {
    state: Arc<Mutex<LinkState>>,
    events: PeerEventSink,
}

impl FakeLink {
    pub fn new(events: PeerEventSink) -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                calls: Vec::new(),
                remote: None,
                candidates: Vec::new(),
                detached: false,
                reject_remote: false,
                reject_candidates: false,
            })),
            events,
        }
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        lock(&self.state).calls.clone()
    }

    /// Candidate strings applied, in order.
    pub fn applied_candidates(&self) -> Vec<String> {
        lock(&self.state).candidates.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.state).remote.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| **c == LinkCall::Close)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn reject_remote_descriptions(&self) {
        lock(&self.state).reject_remote = true;
    }

    pub fn reject_candidates(&self) {
        lock(&self.state).reject_candidates = true;
    }

    /// Report `event` as if the connection raised it. Dropped once handlers
    /// are detached.
    pub fn emit(&self, event: PeerEvent) {
        if lock(&self.state).detached {
            return;
        }
        self.events.emit(event);
    }

    fn record(&self, call: LinkCall) {
        lock(&self.state).calls.push(call);
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.record(LinkCall::CreateOffer);
        Ok(SessionDescription::offer(format!(
            "v=0 fake offer {}",
            self.events.session()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.record(LinkCall::CreateAnswer);
        if lock(&self.state).remote.is_none() {
            return Err(CallError::Negotiation(
                "cannot answer without a remote offer".to_string(),
            ));
        }
        Ok(SessionDescription::answer(format!(
            "v=0 fake answer {}",
            self.events.session()
        )))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.record(LinkCall::SetRemote(desc.clone()));
        let mut state = lock(&self.state);
        if state.reject_remote {
            return Err(CallError::Negotiation("remote description rejected".to_string()));
        }
        state.remote = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.record(LinkCall::AddCandidate(candidate.candidate.clone()));
        let mut state = lock(&self.state);
        if state.remote.is_none() {
            return Err(CallError::Negotiation(
                "candidate applied before remote description".to_string(),
            ));
        }
        if state.reject_candidates {
            return Err(CallError::Negotiation("candidate rejected".to_string()));
        }
        state.candidates.push(candidate.candidate);
        Ok(())
    }

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), CallError> {
        self.record(LinkCall::AddStream(stream.id.clone()));
        // Every new sender asks for negotiation, whichever side we are on.
        self.emit(PeerEvent::NegotiationNeeded);
        Ok(())
    }

    async fn detach_handlers(&self) {
        self.record(LinkCall::DetachHandlers);
        lock(&self.state).detached = true;
    }

    async fn close(&self) -> Result<(), CallError> {
        self.record(LinkCall::Close);
        Ok(())
    }
}

/// Connector handing out [`FakeLink`]s and keeping a handle to each.
#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<Vec<FakeLink>>,
    fail_connect: AtomicBool,
}

impl FakeConnector {
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn links_created(&self) -> usize {
        lock(&self.links).len()
    }

    /// The most recently created link.
    ///
    /// # Panics
    /// If no link was created yet.
    pub fn last_link(&self) -> FakeLink {
        match lock(&self.links).last() {
            Some(link) => link.clone(),
            None => panic!("no peer connection has been created"),
        }
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        _config: &RTCConfiguration,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, CallError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(CallError::Negotiation("peer connection refused".to_string()));
        }
        let link = FakeLink::new(events);
        lock(&self.links).push(link.clone());
        Ok(Box::new(link))
    }
}

/// Media double that can be told to fail and remembers what it handed out.
#[derive(Debug, Default)]
pub struct FakeMedia {
    failure: Mutex<Option<String>>,
    acquired: Mutex<Vec<MediaStream>>,
}

impl FakeMedia {
    /// Make the next acquisition fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *lock(&self.failure) = Some(reason.into());
    }

    pub fn acquired(&self) -> Vec<MediaStream> {
        lock(&self.acquired).clone()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, CallError> {
        if let Some(reason) = lock(&self.failure).take() {
            return Err(CallError::Media(reason));
        }
        let stream = MediaStream::for_constraints(constraints);
        lock(&self.acquired).push(stream.clone());
        Ok(stream)
    }
}
