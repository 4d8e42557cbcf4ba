//! Huddle: peer-to-peer audio/video calls negotiated over a pub/sub chat
//!
//! This crate joins a chat channel on a publish/subscribe transport, keeps a
//! roster of who else is there, and negotiates WebRTC calls with them by
//! exchanging offers, answers and ICE candidates as channel messages.
//!
//! # Features
//! - Call negotiation state machine with candidate buffering
//! - Signal routing with self-echo suppression
//! - Presence roster driven by join, leave and timeout events
//! - webrtc-rs peer connection backend
//! - In-process transport hub for tests and demos
//!
//! # Usage
//! ```rust,ignore
//! use huddle::{ChatSession, Collaborators, HuddleConfig, LocalHub, LogUi, WebRtcConnector};
//! use huddle::testing::SyntheticDevices;
//! use std::sync::Arc;
//!
//! let config = HuddleConfig::load_or_default();
//! let hub = LocalHub::new();
//! let collab = Collaborators {
//!     transport: Arc::new(hub.connect()),
//!     ui: Arc::new(LogUi::new("me", true)),
//!     media: Arc::new(SyntheticDevices::new()),
//!     connector: Arc::new(WebRtcConnector),
//! };
//! let mut chat = ChatSession::join(collab, config.join_options(None)).await?;
//! chat.send_chat("hello").await?;
//! while chat.step().await {}
//! ```
pub mod call;
pub mod config;
pub mod errors;
pub mod invariant_ppt;
pub mod media;
pub mod roster;
pub mod router;
pub mod session;
pub mod signal;
pub mod transport;
pub mod ui;
pub mod webrtc;

// Testing utilities - recording doubles and synthetic capture
pub mod testing;

// Re-exports for convenience
pub use call::{CallEvent, CallState, CallStateMachine, Collaborators, Negotiation, SessionToken};
pub use config::HuddleConfig;
pub use errors::{CallError, ErrorClass};
pub use media::{MediaConstraints, MediaDevices, MediaStream, RemoteTrack};
pub use roster::{Participant, RosterTracker};
pub use router::{Route, SignalRouter};
pub use session::{ChatSession, JoinOptions};
pub use signal::{IceCandidate, SessionDescription, Signal, SignalKind, WireMessage};
pub use transport::{LocalHub, LocalTransport, SignalingTransport, TransportEvent};
pub use ui::{CallUi, ChatLine, LogUi};
pub use webrtc::{PeerConnector, PeerLink, RTCConfiguration, WebRtcConnector};

/// Initialize logging for huddle
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "huddle=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
