//! Timestamped PCM frames moving between the transport and the session.

use std::time::Duration;

/// A contiguous block of PCM samples at a known rate and channel layout.
///
/// Multi-channel samples are interleaved. `timestamp` is the offset of the
/// first sample from the start of the stream that produced the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 24000, 48000).
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Duration,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, timestamp: Duration) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32, timestamp: Duration) -> Self {
        Self::new(samples, sample_rate, 1, timestamp)
    }

    /// Samples per channel.
    pub fn sample_frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_frames() as f64 / self.sample_rate as f64)
    }

    /// Timestamp just past the last sample.
    pub fn end(&self) -> Duration {
        self.timestamp + self.duration()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square level across all channels.
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Compute the root-mean-square of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
