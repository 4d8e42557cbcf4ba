//! Synthetic capture
//!
//! Produces deterministic payloads shaped like a camera and microphone would
//! produce them, so a call can carry media without any hardware.

use crate::errors::CallError;
use crate::media::{MediaConstraints, MediaDevices, MediaStream, TrackKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use webrtc::media::Sample;

/// Create a synthetic video payload of `len` bytes
///
/// The pattern shifts every frame so consecutive payloads differ.
pub fn synthetic_video_payload(frame_number: u64, len: usize) -> Bytes {
    let base = (frame_number % 256) as u8;
    let data: Vec<u8> = (0..len)
        .map(|i| base.wrapping_add((i % 256) as u8))
        .collect();
    Bytes::from(data)
}

/// Create a synthetic audio payload: a 440Hz tone as 16-bit little endian
/// mono at 48kHz
pub fn synthetic_audio_payload(frame_number: u64, samples_per_frame: usize) -> Bytes {
    let sample_rate = 48000.0;
    let frequency = 440.0;
    let mut data = Vec::with_capacity(samples_per_frame * 2);

    for i in 0..samples_per_frame {
        let t = (frame_number as f64 * samples_per_frame as f64 + i as f64) / sample_rate;
        let value = ((2.0 * std::f64::consts::PI * frequency * t).sin() * 0.3 * i16::MAX as f64) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }

    Bytes::from(data)
}

/// Media devices backed by synthetic capture.
#[derive(Debug, Clone, Default)]
pub struct SyntheticDevices {
    /// Simulated time a device takes to open
    pub open_delay: Duration,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_delay(open_delay: Duration) -> Self {
        Self { open_delay }
    }

    /// Write `frames` synthetic samples to every live track of `stream`.
    ///
    /// Returns the number of samples written. Stopped tracks are skipped.
    pub async fn pump(stream: &MediaStream, frames: u64) -> Result<usize, CallError> {
        let mut written = 0;
        for frame_number in 0..frames {
            for track in stream.tracks.iter().filter(|t| !t.is_stopped()) {
                let sample = match track.kind() {
                    TrackKind::Audio => Sample {
                        data: synthetic_audio_payload(frame_number, 960),
                        duration: Duration::from_millis(20),
                        ..Default::default()
                    },
                    TrackKind::Video => Sample {
                        data: synthetic_video_payload(frame_number, 1200),
                        duration: Duration::from_millis(33),
                        ..Default::default()
                    },
                };
                track
                    .sample_track()
                    .write_sample(&sample)
                    .await
                    .map_err(|e| CallError::Media(e.to_string()))?;
                written += 1;
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, CallError> {
        if !constraints.audio && !constraints.video {
            return Err(CallError::Media("no audio or video requested".to_string()));
        }
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        let stream = MediaStream::for_constraints(constraints);
        log::debug!("Opened synthetic stream {} with {} tracks", stream.id, stream.tracks.len());
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_video_payloads_differ() {
        let frame0 = synthetic_video_payload(0, 64);
        let frame1 = synthetic_video_payload(1, 64);
        assert_eq!(frame0.len(), 64);
        assert_ne!(frame0[0], frame1[0]);
    }

    #[test]
    fn test_synthetic_audio_has_signal() {
        let payload = synthetic_audio_payload(0, 960);
        assert_eq!(payload.len(), 960 * 2);
        let peak = payload
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]).unsigned_abs())
            .max()
            .unwrap();
        assert!(peak > 3000, "Audio should have signal, got {}", peak);
    }

    #[tokio::test]
    async fn test_acquire_follows_constraints() {
        let devices = SyntheticDevices::new();
        let stream = devices
            .acquire(&MediaConstraints {
                audio: false,
                video: true,
            })
            .await
            .unwrap();
        assert_eq!(stream.tracks.len(), 1);
        assert_eq!(stream.tracks[0].kind(), TrackKind::Video);
    }

    #[tokio::test]
    async fn test_acquire_nothing_is_an_error() {
        let err = SyntheticDevices::new()
            .acquire(&MediaConstraints {
                audio: false,
                video: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Media(_)));
    }

    #[tokio::test]
    async fn test_pump_skips_stopped_tracks() {
        let stream = MediaStream::for_constraints(&MediaConstraints::default());
        stream.tracks[0].stop();
        let written = SyntheticDevices::pump(&stream, 3).await.unwrap();
        assert_eq!(written, 3);
    }
}
