//! Signaling transport boundary.
//!
//! The transport fans JSON payloads out to every subscriber of a channel
//! (including the publisher) and reports presence changes. Nothing here
//! assumes ordering or exactly-once delivery.

pub mod local;

use crate::errors::CallError;
use crate::signal::{PresenceEvent, PresenceSnapshot, WireMessage};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub use local::{LocalHub, LocalTransport};

/// Subscription options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub with_presence: bool,
}

impl SubscribeOptions {
    pub fn with_presence() -> Self {
        Self {
            with_presence: true,
        }
    }
}

/// Handle returned by [`SignalingTransport::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Event delivered to registered listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message {
        channel: String,
        publisher: String,
        /// Raw payload; decoding is the router's job.
        message: serde_json::Value,
    },
    Presence {
        channel: String,
        event: PresenceEvent,
    },
}

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn subscribe(&self, channels: &[String], options: SubscribeOptions) -> Result<(), CallError>;

    async fn unsubscribe(&self, channels: &[String]) -> Result<(), CallError>;

    async fn unsubscribe_all(&self) -> Result<(), CallError>;

    async fn publish(&self, message: &WireMessage, channel: &str) -> Result<(), CallError>;

    /// Transport-assigned id of this client.
    fn local_id(&self) -> String;

    async fn query_presence(&self, channels: &[String]) -> Result<PresenceSnapshot, CallError>;

    fn add_listener(&self, sink: UnboundedSender<TransportEvent>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    async fn disconnect(&self) -> Result<(), CallError>;
}
