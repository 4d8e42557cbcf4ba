//! Signaling hot path benchmarks for huddle
//!
//! Run with: cargo bench --bench signal_benchmarks
//!
//! Every inbound channel message is decoded and routed, and presence
//! traffic hits the roster, so these paths set the per-message cost.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use huddle::signal::{IceCandidate, PresenceAction, PresenceEvent, SessionDescription, Signal};
use huddle::testing::RecordingUi;
use huddle::{RosterTracker, SignalRouter};
use std::sync::Arc;
use std::time::Duration;

/// Generate an SDP body of roughly `lines` attribute lines
fn generate_test_sdp(lines: usize) -> String {
    let mut sdp = String::from("v=0\r\no=- 46117317 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
    for i in 0..lines {
        sdp.push_str(&format!("a=candidate:{} 1 udp 2122260223 192.168.1.{} 5{:04} typ host\r\n", i, i % 255, i));
    }
    sdp
}

fn bench_route_offer(c: &mut Criterion) {
    let mut group = c.benchmark_group("Route offer");
    group.measurement_time(Duration::from_secs(5));
    let router = SignalRouter::new("me");

    for lines in [10usize, 100, 1000] {
        let wire = Signal::Offer(SessionDescription::offer(generate_test_sdp(lines)))
            .to_wire()
            .unwrap();
        let value = serde_json::to_value(&wire).unwrap();
        group.throughput(Throughput::Bytes(value.to_string().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &value, |b, value| {
            b.iter(|| router.route_value(black_box(value), "room", "peer"))
        });
    }
    group.finish();
}

fn bench_route_candidate(c: &mut Criterion) {
    let router = SignalRouter::new("me");
    let mut candidate = IceCandidate::new("candidate:1 1 udp 2122260223 192.168.1.4 54321 typ host");
    candidate.sdp_mid = Some("0".to_string());
    candidate.sdp_mline_index = Some(0);
    let value = serde_json::to_value(Signal::Candidate(Some(candidate)).to_wire().unwrap()).unwrap();

    c.bench_function("route candidate", |b| {
        b.iter(|| router.route_value(black_box(&value), "room", "peer"))
    });
    c.bench_function("route self-echo candidate", |b| {
        b.iter(|| router.route_value(black_box(&value), "room", "me"))
    });
}

fn bench_roster_churn(c: &mut Criterion) {
    let events: Vec<PresenceEvent> = (0..200)
        .map(|i| {
            let action = if i % 3 == 2 {
                PresenceAction::Leave
            } else {
                PresenceAction::Join
            };
            PresenceEvent::new(action, format!("user-{}", i % 50))
        })
        .collect();

    c.bench_function("roster churn 200 events", |b| {
        b.iter(|| {
            let mut roster = RosterTracker::new("me", Arc::new(RecordingUi::default()));
            for event in &events {
                roster.apply(black_box(event));
            }
            roster.len()
        })
    });
}

criterion_group!(benches, bench_route_offer, bench_route_candidate, bench_roster_churn);
criterion_main!(benches);
