use super::{ListenerId, SignalingTransport, SubscribeOptions, TransportEvent};
use crate::errors::CallError;
use crate::signal::{ChannelOccupancy, Occupant, PresenceAction, PresenceEvent, PresenceSnapshot, WireMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;

/// In-process pub/sub hub with presence, for tests and loopback runs.
///
/// Every client connected to the same hub sees the others' publications and
/// presence changes. Messages are echoed back to the publisher, like the
/// hosted services this stands in for.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    next_listener: u64,
    clients: HashMap<String, ClientState>,
    history: Vec<Published>,
}

#[derive(Default)]
struct ClientState {
    connected: bool,
    /// channel -> receives presence events
    subscriptions: HashMap<String, bool>,
    listeners: Vec<(ListenerId, UnboundedSender<TransportEvent>)>,
}

/// A message as recorded by the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub channel: String,
    pub publisher: String,
    pub message: serde_json::Value,
}

impl HubState {
    fn deliver(&mut self, channel: &str, event: TransportEvent, presence_only: bool, skip: Option<&str>) {
        for (id, client) in self.clients.iter_mut() {
            if Some(id.as_str()) == skip {
                continue;
            }
            let Some(&with_presence) = client.subscriptions.get(channel) else {
                continue;
            };
            if presence_only && !with_presence {
                continue;
            }
            client
                .listeners
                .retain(|(_, sink)| sink.send(event.clone()).is_ok());
        }
    }

    fn announce(&mut self, channel: &str, action: PresenceAction, uuid: &str, skip: Option<&str>) {
        let event = TransportEvent::Presence {
            channel: channel.to_string(),
            event: PresenceEvent::new(action, uuid),
        };
        self.deliver(channel, event, true, skip);
    }

    fn drop_subscriptions(&mut self, id: &str, channels: &[String], action: PresenceAction) {
        let removed: Vec<String> = match self.clients.get_mut(id) {
            Some(client) => channels
                .iter()
                .filter(|c| client.subscriptions.remove(c.as_str()).is_some())
                .cloned()
                .collect(),
            None => return,
        };
        for channel in removed {
            self.announce(&channel, action, id, Some(id));
        }
    }
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connect a client with a freshly generated id.
    pub fn connect(&self) -> LocalTransport {
        self.connect_as(uuid::Uuid::new_v4().to_string())
    }

    pub fn connect_as(&self, id: impl Into<String>) -> LocalTransport {
        let id = id.into();
        let mut state = self.state();
        let client = state.clients.entry(id.clone()).or_default();
        client.connected = true;
        log::debug!("Client {} connected to local hub", id);
        LocalTransport {
            hub: self.clone(),
            id,
        }
    }

    /// Simulate a heartbeat timeout: the client silently drops off every
    /// channel and remaining subscribers see a `timeout` presence event.
    pub fn expire(&self, id: &str) {
        let mut state = self.state();
        let channels: Vec<String> = match state.clients.get(id) {
            Some(client) => client.subscriptions.keys().cloned().collect(),
            None => return,
        };
        state.drop_subscriptions(id, &channels, PresenceAction::Timeout);
    }

    /// Messages published on `channel`, in publication order.
    pub fn history(&self, channel: &str) -> Vec<Published> {
        self.state()
            .history
            .iter()
            .filter(|p| p.channel == channel)
            .cloned()
            .collect()
    }
}

/// One client's view of a [`LocalHub`].
#[derive(Clone)]
pub struct LocalTransport {
    hub: LocalHub,
    id: String,
}

impl LocalTransport {
    fn ensure_connected(&self, state: &HubState) -> Result<(), CallError> {
        match state.clients.get(&self.id) {
            Some(client) if client.connected => Ok(()),
            _ => Err(CallError::Transport(format!(
                "client {} is disconnected",
                self.id
            ))),
        }
    }
}

#[async_trait]
impl SignalingTransport for LocalTransport {
    async fn subscribe(&self, channels: &[String], options: SubscribeOptions) -> Result<(), CallError> {
        let mut state = self.hub.state();
        self.ensure_connected(&state)?;

        let mut joined = Vec::new();
        if let Some(client) = state.clients.get_mut(&self.id) {
            for channel in channels {
                if client
                    .subscriptions
                    .insert(channel.clone(), options.with_presence)
                    .is_none()
                {
                    joined.push(channel.clone());
                }
            }
        }
        for channel in joined {
            log::debug!("{} subscribed to {}", self.id, channel);
            state.announce(&channel, PresenceAction::Join, &self.id, None);
        }
        Ok(())
    }

    async fn unsubscribe(&self, channels: &[String]) -> Result<(), CallError> {
        let mut state = self.hub.state();
        state.drop_subscriptions(&self.id, channels, PresenceAction::Leave);
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<(), CallError> {
        let mut state = self.hub.state();
        let channels: Vec<String> = match state.clients.get(&self.id) {
            Some(client) => client.subscriptions.keys().cloned().collect(),
            None => return Ok(()),
        };
        state.drop_subscriptions(&self.id, &channels, PresenceAction::Leave);
        Ok(())
    }

    async fn publish(&self, message: &WireMessage, channel: &str) -> Result<(), CallError> {
        let payload = serde_json::to_value(message)
            .map_err(|e| CallError::Transport(format!("Failed to encode message: {}", e)))?;

        let mut state = self.hub.state();
        self.ensure_connected(&state)?;

        state.history.push(Published {
            channel: channel.to_string(),
            publisher: self.id.clone(),
            message: payload.clone(),
        });
        let event = TransportEvent::Message {
            channel: channel.to_string(),
            publisher: self.id.clone(),
            message: payload,
        };
        state.deliver(channel, event, false, None);
        Ok(())
    }

    fn local_id(&self) -> String {
        self.id.clone()
    }

    async fn query_presence(&self, channels: &[String]) -> Result<PresenceSnapshot, CallError> {
        let state = self.hub.state();
        self.ensure_connected(&state)?;

        let mut snapshot = PresenceSnapshot::default();
        for channel in channels {
            let mut occupants: Vec<Occupant> = state
                .clients
                .iter()
                .filter(|(_, c)| c.subscriptions.contains_key(channel))
                .map(|(id, _)| Occupant { uuid: id.clone() })
                .collect();
            occupants.sort_by(|a, b| a.uuid.cmp(&b.uuid));
            snapshot
                .channels
                .insert(channel.clone(), ChannelOccupancy { occupants });
        }
        Ok(snapshot)
    }

    fn add_listener(&self, sink: UnboundedSender<TransportEvent>) -> ListenerId {
        let mut state = self.hub.state();
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state
            .clients
            .entry(self.id.clone())
            .or_default()
            .listeners
            .push((id, sink));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        let mut state = self.hub.state();
        if let Some(client) = state.clients.get_mut(&self.id) {
            client.listeners.retain(|(listener, _)| *listener != id);
        }
    }

    async fn disconnect(&self) -> Result<(), CallError> {
        let mut state = self.hub.state();
        let channels: Vec<String> = match state.clients.get(&self.id) {
            Some(client) => client.subscriptions.keys().cloned().collect(),
            None => return Ok(()),
        };
        state.drop_subscriptions(&self.id, &channels, PresenceAction::Leave);
        if let Some(client) = state.clients.get_mut(&self.id) {
            client.connected = false;
            client.listeners.clear();
        }
        log::debug!("Client {} disconnected from local hub", self.id);
        Ok(())
    }
}
