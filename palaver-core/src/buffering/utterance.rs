//! A sealed unit of user speech, handed from the turn buffer to the orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;

/// Why the turn buffer closed an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealReason {
    /// The trailing-silence window elapsed.
    TrailingSilence,
    /// The utterance hit the hard length cap.
    MaxDuration,
    /// The input stream ended while the user was still speaking.
    EndOfStream,
}

/// Ordered frames of one stretch of speech.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Monotonic per turn buffer, starting at 1.
    pub id: u64,
    pub frames: Vec<AudioFrame>,
    pub sample_rate: u32,
    pub channels: u16,
    pub reason: SealReason,
}

impl Utterance {
    /// Timestamp of the first frame.
    pub fn started_at(&self) -> Duration {
        self.frames.first().map(|f| f.timestamp).unwrap_or_default()
    }

    /// Timestamp just past the last frame.
    pub fn ended_at(&self) -> Duration {
        self.frames.last().map(AudioFrame::end).unwrap_or_default()
    }

    /// Total audio duration (sum of frame durations).
    pub fn duration(&self) -> Duration {
        self.frames.iter().map(AudioFrame::duration).sum()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// All samples, concatenated in order.
    pub fn samples(&self) -> Vec<f32> {
        let total = self.frames.iter().map(|f| f.samples.len()).sum();
        let mut out = Vec::with_capacity(total);
        for frame in &self.frames {
            out.extend_from_slice(&frame.samples);
        }
        out
    }
}
