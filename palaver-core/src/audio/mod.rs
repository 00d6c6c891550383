//! Audio primitives shared by transports, the turn buffer and providers.
//!
//! Frames are plain owned buffers. Transports build them, the turn buffer
//! copies them into utterances, and synthesizers produce them for playback.

pub mod frame;
pub mod resample;

use std::f32::consts::TAU;
use std::time::Duration;

pub use frame::{rms, AudioFrame};

/// Split mono samples into frames of `frame_ms`, timestamped from `start`.
///
/// The final frame may be shorter than `frame_ms`.
pub fn frames_from_samples(
    samples: &[f32],
    sample_rate: u32,
    frame_ms: u32,
    start: Duration,
) -> Vec<AudioFrame> {
    let frame_len = ((sample_rate as u64 * frame_ms as u64) / 1000).max(1) as usize;
    let mut timestamp = start;
    samples
        .chunks(frame_len)
        .map(|chunk| {
            let frame = AudioFrame::mono(chunk.to_vec(), sample_rate, timestamp);
            timestamp = frame.end();
            frame
        })
        .collect()
}

/// A sine tone cut into `frame_ms` frames.
pub fn tone(
    frequency_hz: f32,
    duration: Duration,
    sample_rate: u32,
    amplitude: f32,
    frame_ms: u32,
) -> Vec<AudioFrame> {
    let total = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
    let samples: Vec<f32> = (0..total)
        .map(|n| amplitude * (TAU * frequency_hz * n as f32 / sample_rate as f32).sin())
        .collect();
    frames_from_samples(&samples, sample_rate, frame_ms, Duration::ZERO)
}

/// The half-second 440 Hz tone played when synthesis fails and the tone
/// fallback is enabled.
pub fn fallback_tone(sample_rate: u32) -> Vec<AudioFrame> {
    tone(440.0, Duration::from_millis(500), sample_rate, 0.5, 20)
}
