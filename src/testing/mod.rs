//! Testing utilities for huddle
//!
//! Synthetic capture for running calls without devices, plus recording
//! doubles for the transport, UI and peer connection boundaries so the
//! session logic can be exercised offline.

pub mod fakes;
pub mod synthetic;

pub use fakes::{
    FakeConnector, FakeLink, FakeMedia, LinkCall, RecordingTransport, RecordingUi, UiCall,
};
pub use synthetic::{synthetic_audio_payload, synthetic_video_payload, SyntheticDevices};
