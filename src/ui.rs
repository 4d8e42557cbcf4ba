//! Rendering surface boundary.

use crate::media::{MediaStream, RemoteTrack};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat line as handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub from: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Everything the core asks of the UI layer.
///
/// Calls arrive in processing order from a single task. Only
/// [`CallUi::confirm_call`] may suspend for long; it is run off the event
/// loop.
#[async_trait]
pub trait CallUi: Send + Sync {
    fn reveal_call_surface(&self);
    fn hide_call_surface(&self);
    fn append_chat(&self, line: &ChatLine);
    fn add_roster_entry(&self, id: &str);
    fn remove_roster_entry(&self, id: &str);
    fn attach_local_stream(&self, stream: &MediaStream);
    fn attach_remote_track(&self, track: &RemoteTrack);
    fn clear_local_stream(&self);
    fn clear_remote_stream(&self);
    fn set_hang_up_enabled(&self, enabled: bool);
    /// The remote party declined our offer.
    fn notify_declined(&self, by: &str);
    /// The call attempt ended because of a media or negotiation failure.
    fn report_call_failure(&self, reason: &str);
    /// Ask the user whether to answer an inbound call.
    async fn confirm_call(&self, caller: &str) -> bool;
}

/// Headless UI that writes every request to the log.
#[derive(Debug, Clone)]
pub struct LogUi {
    label: String,
    auto_answer: bool,
}

impl LogUi {
    pub fn new(label: impl Into<String>, auto_answer: bool) -> Self {
        Self {
            label: label.into(),
            auto_answer,
        }
    }
}

#[async_trait]
impl CallUi for LogUi {
    fn reveal_call_surface(&self) {
        log::info!("[{}] call surface shown", self.label);
    }

    fn hide_call_surface(&self) {
        log::info!("[{}] call surface hidden", self.label);
    }

    fn append_chat(&self, line: &ChatLine) {
        log::info!(
            "[{}] {} <{}> {}",
            self.label,
            line.received_at.format("%H:%M:%S"),
            line.from,
            line.text
        );
    }

    fn add_roster_entry(&self, id: &str) {
        log::info!("[{}] online: {}", self.label, id);
    }

    fn remove_roster_entry(&self, id: &str) {
        log::info!("[{}] offline: {}", self.label, id);
    }

    fn attach_local_stream(&self, stream: &MediaStream) {
        log::info!(
            "[{}] local stream {} ({} tracks)",
            self.label,
            stream.id,
            stream.tracks.len()
        );
    }

    fn attach_remote_track(&self, track: &RemoteTrack) {
        log::info!(
            "[{}] remote {:?} track {} from stream {}",
            self.label,
            track.kind,
            track.id,
            track.stream_id
        );
    }

    fn clear_local_stream(&self) {
        log::debug!("[{}] local display cleared", self.label);
    }

    fn clear_remote_stream(&self) {
        log::debug!("[{}] remote display cleared", self.label);
    }

    fn set_hang_up_enabled(&self, enabled: bool) {
        log::debug!("[{}] hang-up enabled: {}", self.label, enabled);
    }

    fn notify_declined(&self, by: &str) {
        log::warn!("[{}] {} declined the call", self.label, by);
    }

    fn report_call_failure(&self, reason: &str) {
        log::error!("[{}] call failed: {}", self.label, reason);
    }

    async fn confirm_call(&self, caller: &str) -> bool {
        log::info!(
            "[{}] {} is calling, answering: {}",
            self.label,
            caller,
            self.auto_answer
        );
        self.auto_answer
    }
}
