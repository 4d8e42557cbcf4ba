//! Negotiation over the real webrtc-rs backend
//!
//! Two clients on one in-process hub negotiate a call with actual peer
//! connections and synthetic capture. No ICE servers are configured, so
//! only host candidates are exchanged.

use huddle::signal::{SignalKind, WireMessage};
use huddle::testing::{RecordingUi, SyntheticDevices, UiCall};
use huddle::webrtc::RTCConfiguration;
use huddle::{CallState, ChatSession, Collaborators, JoinOptions, LocalHub, WebRtcConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

async fn join(hub: &LocalHub, id: &str, ui: Arc<RecordingUi>) -> ChatSession {
    let collab = Collaborators {
        transport: Arc::new(hub.connect_as(id)),
        ui,
        media: Arc::new(SyntheticDevices::new()),
        connector: Arc::new(WebRtcConnector),
    };
    let options = JoinOptions {
        channel: "loopback".to_string(),
        rtc: RTCConfiguration {
            ice_servers: Vec::new(),
            ..Default::default()
        },
        ..Default::default()
    };
    ChatSession::join(collab, options).await.unwrap()
}

/// Handle whatever both clients have ready until `done` holds or `window`
/// runs out. Every event is handled to completion.
async fn drive(
    alice: &mut ChatSession,
    bob: &mut ChatSession,
    window: Duration,
    done: impl Fn(CallState, CallState) -> bool,
) -> bool {
    let deadline = Instant::now() + window;
    while Instant::now() < deadline {
        alice.settle().await;
        bob.settle().await;
        if done(alice.call_state(), bob.call_state()) {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

fn count_signals(hub: &LocalHub, publisher: &str, kind: SignalKind) -> usize {
    hub.history("loopback")
        .into_iter()
        .filter(|p| p.publisher == publisher)
        .filter(|p| {
            matches!(
                WireMessage::from_value(&p.message),
                Ok(WireMessage::WebRtcSignal { value, .. }) if value == kind
            )
        })
        .count()
}

#[tokio::test]
async fn test_offer_answer_over_webrtc_rs() {
    let hub = LocalHub::new();
    let alice_ui = Arc::new(RecordingUi::new(true));
    let bob_ui = Arc::new(RecordingUi::new(true));
    let mut alice = join(&hub, "alice", alice_ui.clone()).await;
    let mut bob = join(&hub, "bob", bob_ui.clone()).await;

    alice.request_call().await.unwrap();
    let connected = drive(&mut alice, &mut bob, Duration::from_secs(10), |a, b| {
        a == CallState::Connected && b == CallState::Connected
    })
    .await;
    assert!(connected, "negotiation did not settle");

    // Late negotiation-needed events and trickling candidates must not move
    // either side off Connected.
    drive(&mut alice, &mut bob, Duration::from_secs(3), |_, _| false).await;

    assert_eq!(alice.call_state(), CallState::Connected);
    assert_eq!(bob.call_state(), CallState::Connected);
    assert_eq!(count_signals(&hub, "alice", SignalKind::Offer), 1);
    assert_eq!(count_signals(&hub, "alice", SignalKind::Answer), 0);
    assert_eq!(count_signals(&hub, "bob", SignalKind::Answer), 1);
    assert_eq!(count_signals(&hub, "bob", SignalKind::Offer), 0);

    assert!(alice_ui.calls().contains(&UiCall::LocalStream));
    assert!(bob_ui.calls().contains(&UiCall::LocalStream));
    assert!(bob_ui.calls().contains(&UiCall::Confirm("alice".into())));

    alice.leave().await.unwrap();
    bob.leave().await.unwrap();
}

#[tokio::test]
async fn test_declined_call_over_webrtc_rs() {
    let hub = LocalHub::new();
    let alice_ui = Arc::new(RecordingUi::new(true));
    let bob_ui = Arc::new(RecordingUi::new(false));
    let mut alice = join(&hub, "alice", alice_ui.clone()).await;
    let mut bob = join(&hub, "bob", bob_ui.clone()).await;

    alice.request_call().await.unwrap();
    let closed = drive(&mut alice, &mut bob, Duration::from_secs(10), |a, b| {
        a == CallState::Closed && b == CallState::Closed
    })
    .await;
    assert!(closed, "decline did not reach both sides");

    assert!(!alice.is_in_call());
    assert!(!bob.is_in_call());
    assert_eq!(count_signals(&hub, "bob", SignalKind::Decline), 1);
    assert_eq!(count_signals(&hub, "bob", SignalKind::Answer), 0);
    assert!(alice_ui.calls().contains(&UiCall::Declined("bob".into())));
}
