//! Presence-driven roster of remote participants on the user channel.

use crate::assert_invariant;
use crate::signal::{PresenceAction, PresenceEvent, PresenceSnapshot};
use crate::ui::CallUi;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
}

/// Tracks who else is present on the channel.
///
/// The transport gives no ordering or delivery-count guarantees, so every
/// operation is idempotent: duplicate joins and leaves for unknown ids are
/// silently absorbed. Events are applied strictly in arrival order.
pub struct RosterTracker {
    local_id: String,
    participants: Vec<Participant>,
    ui: Arc<dyn CallUi>,
}

impl RosterTracker {
    pub fn new(local_id: impl Into<String>, ui: Arc<dyn CallUi>) -> Self {
        Self {
            local_id: local_id.into(),
            participants: Vec::new(),
            ui,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Read-only view, in the order participants were first seen.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.id == id)
    }

    /// Merge the occupant list of `channel` from a presence query.
    pub fn reconcile(&mut self, snapshot: &PresenceSnapshot, channel: &str) {
        let occupants: Vec<String> = snapshot.occupants(channel).map(str::to_string).collect();
        log::debug!(
            "Reconciling roster with {} occupants of {}",
            occupants.len(),
            channel
        );
        for id in occupants {
            self.on_join(&id);
        }
    }

    pub fn on_join(&mut self, id: &str) {
        if id == self.local_id || self.contains(id) {
            return;
        }
        self.participants.push(Participant { id: id.to_string() });
        self.ui.add_roster_entry(id);
        log::info!("{} is online", id);

        assert_invariant!(
            self.participants.iter().filter(|p| p.id == id).count() == 1,
            "Roster holds at most one entry per participant",
            "roster::on_join"
        );
    }

    pub fn on_leave(&mut self, id: &str) {
        self.remove(id, "left");
    }

    pub fn on_timeout(&mut self, id: &str) {
        self.remove(id, "timed out");
    }

    fn remove(&mut self, id: &str, why: &str) {
        let Some(index) = self.position(id) else {
            log::debug!("Ignoring removal of unknown participant {}", id);
            return;
        };
        self.participants.remove(index);
        self.ui.remove_roster_entry(id);
        log::info!("{} {}", id, why);
    }

    /// Apply one presence event from the transport.
    pub fn apply(&mut self, event: &PresenceEvent) {
        match event.action {
            PresenceAction::Join => self.on_join(&event.uuid),
            PresenceAction::Leave => self.on_leave(&event.uuid),
            PresenceAction::Timeout => self.on_timeout(&event.uuid),
            PresenceAction::StateChange => {}
        }

        assert_invariant!(
            !self.contains(&self.local_id),
            "Local participant is never in the roster",
            "roster::apply"
        );
    }

    /// Remove everyone, e.g. when leaving the chat.
    pub fn clear(&mut self) {
        for participant in self.participants.drain(..) {
            self.ui.remove_roster_entry(&participant.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ChannelOccupancy, Occupant};
    use crate::testing::{RecordingUi, UiCall};

    fn tracker() -> (RosterTracker, Arc<RecordingUi>) {
        let ui = Arc::new(RecordingUi::default());
        (RosterTracker::new("me", ui.clone()), ui)
    }

    fn ids(roster: &RosterTracker) -> Vec<&str> {
        roster.participants().iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_duplicate_join_is_ignored() {
        let (mut roster, ui) = tracker();
        roster.on_join("alice");
        roster.on_join("alice");
        assert_eq!(ids(&roster), vec!["alice"]);
        assert_eq!(ui.calls(), vec![UiCall::RosterAdd("alice".into())]);
    }

    #[test]
    fn test_leave_of_unknown_is_noop() {
        let (mut roster, ui) = tracker();
        roster.on_join("alice");
        roster.on_leave("bob");
        roster.on_timeout("carol");
        assert_eq!(ids(&roster), vec!["alice"]);
        assert_eq!(ui.calls().len(), 1);
    }

    #[test]
    fn test_local_id_never_tracked() {
        let (mut roster, ui) = tracker();
        roster.apply(&PresenceEvent::new(PresenceAction::Join, "me"));
        assert!(roster.is_empty());
        assert!(ui.calls().is_empty());
    }

    #[test]
    fn test_reconcile_skips_known_and_local() {
        let (mut roster, ui) = tracker();
        roster.on_join("bob");

        let mut snapshot = PresenceSnapshot::default();
        snapshot.channels.insert(
            "room".into(),
            ChannelOccupancy {
                occupants: ["me", "alice", "bob"]
                    .iter()
                    .map(|id| Occupant { uuid: id.to_string() })
                    .collect(),
            },
        );
        roster.reconcile(&snapshot, "room");
        roster.reconcile(&snapshot, "room");

        assert_eq!(ids(&roster), vec!["bob", "alice"]);
        assert_eq!(
            ui.calls(),
            vec![
                UiCall::RosterAdd("bob".into()),
                UiCall::RosterAdd("alice".into()),
            ]
        );
    }

    #[test]
    fn test_events_apply_in_arrival_order() {
        let (mut roster, ui) = tracker();
        for event in [
            PresenceEvent::new(PresenceAction::Join, "a"),
            PresenceEvent::new(PresenceAction::Join, "b"),
            PresenceEvent::new(PresenceAction::StateChange, "a"),
            PresenceEvent::new(PresenceAction::Timeout, "a"),
            PresenceEvent::new(PresenceAction::Join, "a"),
        ] {
            roster.apply(&event);
        }
        assert_eq!(ids(&roster), vec!["b", "a"]);
        assert_eq!(
            ui.calls(),
            vec![
                UiCall::RosterAdd("a".into()),
                UiCall::RosterAdd("b".into()),
                UiCall::RosterRemove("a".into()),
                UiCall::RosterAdd("a".into()),
            ]
        );
    }

    #[test]
    fn test_clear_notifies_each_removal() {
        let (mut roster, ui) = tracker();
        roster.on_join("a");
        roster.on_join("b");
        roster.clear();
        assert!(roster.is_empty());
        assert_eq!(ui.calls().len(), 4);
    }
}
