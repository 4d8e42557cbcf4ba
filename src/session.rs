//! Chat session controller.
//!
//! A [`ChatSession`] is one client's membership of one chat channel. It owns
//! the roster, the router and the call state machine, and feeds them from a
//! single event loop: [`ChatSession::step`] waits for the next transport or
//! call event and handles it to completion before looking at the next one.

use crate::call::{CallEvent, CallState, CallStateMachine, Collaborators, SessionToken};
use crate::errors::CallError;
use crate::media::MediaConstraints;
use crate::roster::RosterTracker;
use crate::router::{CallRoute, Route, SignalRouter, SurfaceChange};
use crate::signal::WireMessage;
use crate::transport::{ListenerId, SignalingTransport, SubscribeOptions, TransportEvent};
use crate::ui::{CallUi, ChatLine};
use crate::webrtc::RTCConfiguration;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub const DEFAULT_CHANNEL: &str = "default";

/// Settings for joining a channel.
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    /// Channel to join; empty means [`DEFAULT_CHANNEL`].
    pub channel: String,
    pub rtc: RTCConfiguration,
    pub constraints: MediaConstraints,
}

enum Next {
    Transport(Option<TransportEvent>),
    Call(Option<CallEvent>),
}

pub struct ChatSession {
    transport: Arc<dyn SignalingTransport>,
    ui: Arc<dyn CallUi>,
    channel: String,
    local_id: String,
    roster: RosterTracker,
    router: SignalRouter,
    calls: CallStateMachine,
    inbound: UnboundedReceiver<TransportEvent>,
    listener: Option<ListenerId>,
}

impl ChatSession {
    /// Join a channel: listen, subscribe with presence, then seed the roster
    /// from a presence snapshot.
    pub async fn join(collab: Collaborators, options: JoinOptions) -> Result<Self, CallError> {
        let channel = if options.channel.trim().is_empty() {
            DEFAULT_CHANNEL.to_string()
        } else {
            options.channel
        };
        let transport = Arc::clone(&collab.transport);
        let ui = Arc::clone(&collab.ui);
        let local_id = transport.local_id();

        let (tx, inbound) = mpsc::unbounded_channel();
        let listener = transport.add_listener(tx);
        let channels = [channel.clone()];

        if let Err(e) = transport
            .subscribe(&channels, SubscribeOptions::with_presence())
            .await
        {
            transport.remove_listener(listener);
            return Err(e);
        }

        let mut roster = RosterTracker::new(local_id.clone(), Arc::clone(&ui));
        match transport.query_presence(&channels).await {
            Ok(snapshot) => roster.reconcile(&snapshot, &channel),
            Err(e) => log::warn!("Presence query for {} failed: {}", channel, e),
        }

        log::info!("{} joined {} ({} others present)", local_id, channel, roster.len());

        Ok(Self {
            router: SignalRouter::new(local_id.clone()),
            calls: CallStateMachine::new(collab, options.rtc, options.constraints),
            transport,
            ui,
            channel,
            local_id,
            roster,
            inbound,
            listener: Some(listener),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn roster(&self) -> &RosterTracker {
        &self.roster
    }

    pub fn call_state(&self) -> CallState {
        self.calls.state()
    }

    pub fn is_in_call(&self) -> bool {
        self.calls.is_ongoing()
    }

    pub fn calls(&self) -> &CallStateMachine {
        &self.calls
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), CallError> {
        self.transport
            .publish(&WireMessage::chat(text), &self.channel)
            .await
    }

    /// Place a call to everyone on the channel.
    pub async fn request_call(&mut self) -> Result<SessionToken, CallError> {
        let token = self.calls.create_session(&self.channel).await?;
        self.calls.start_call()?;
        self.ui.reveal_call_surface();
        Ok(token)
    }

    pub async fn hang_up(&mut self) {
        self.calls.hang_up().await;
    }

    /// Wait for the next event and handle it.
    ///
    /// Returns `false` once the transport stops delivering events. Dropping
    /// the future after an event was received leaves that event half
    /// handled, so do not race it against another session's `step`.
    pub async fn step(&mut self) -> bool {
        let next = tokio::select! {
            event = self.inbound.recv() => Next::Transport(event),
            event = self.calls.next_event() => Next::Call(event),
        };

        match next {
            Next::Transport(Some(event)) => self.handle_transport_event(event).await,
            Next::Call(Some(event)) => self.calls.handle_event(event).await,
            Next::Transport(None) | Next::Call(None) => return false,
        }
        true
    }

    /// Handle everything that is ready without waiting for new input.
    ///
    /// Yields between rounds so spawned work (media, confirmations) can
    /// finish. Returns the number of events handled.
    pub async fn settle(&mut self) -> usize {
        let mut handled = 0;
        let mut quiet_rounds = 0;

        while quiet_rounds < 3 {
            tokio::task::yield_now().await;
            let mut progressed = false;

            while let Ok(event) = self.inbound.try_recv() {
                self.handle_transport_event(event).await;
                handled += 1;
                progressed = true;
            }
            while let Some(event) = self.calls.try_next_event() {
                self.calls.handle_event(event).await;
                handled += 1;
                progressed = true;
            }

            quiet_rounds = if progressed { 0 } else { quiet_rounds + 1 };
        }
        handled
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Presence { channel, event } => {
                if channel == self.channel {
                    self.roster.apply(&event);
                } else {
                    log::debug!("Ignoring presence on {}", channel);
                }
            }
            TransportEvent::Message {
                channel,
                publisher,
                message,
            } => {
                let route = self.router.route_value(&message, &channel, &publisher);
                self.apply_route(route).await;
            }
        }
    }

    async fn apply_route(&mut self, route: Route) {
        match route {
            Route::Chat { from, text } => {
                self.ui.append_chat(&ChatLine {
                    from,
                    text,
                    received_at: Utc::now(),
                });
            }
            Route::Call(route) => self.apply_call_route(route).await,
            Route::Ignored { reason } => log::debug!("Ignored inbound message: {}", reason),
        }
    }

    async fn apply_call_route(&mut self, route: CallRoute) {
        match route.surface {
            Some(SurfaceChange::Reveal) => self.ui.reveal_call_surface(),
            Some(SurfaceChange::Hide) => self.ui.hide_call_surface(),
            None => {}
        }

        let Some(signal) = route.signal else {
            return;
        };

        if let Some(channel) = route.bind_channel {
            self.calls.bind_channel(&channel);
        }

        self.calls.handle_signal(signal, &route.sender).await;
    }

    /// Leave the channel: end any call, drop membership and listener,
    /// disconnect, and empty the roster.
    pub async fn leave(mut self) -> Result<(), CallError> {
        if self.calls.is_ongoing() {
            self.calls.hang_up().await;
        }

        let unsubscribed = self.transport.unsubscribe_all().await;
        if let Some(listener) = self.listener.take() {
            self.transport.remove_listener(listener);
        }
        let disconnected = self.transport.disconnect().await;
        self.roster.clear();

        log::info!("{} left {}", self.local_id, self.channel);
        unsubscribed.and(disconnected)
    }
}
