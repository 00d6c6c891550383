//! Energy-based VAD using a fixed RMS threshold.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming frame.
//! 2. If RMS ≥ `threshold` → emit `Speech`, otherwise `Silence`.
//!
//! Each frame is judged on its own. Syllable endings are protected by the
//! turn buffer's trailing-silence window, which counts quiet frames before
//! sealing an utterance.

use super::{VadDecision, VoiceActivityDetector};
use crate::audio::AudioFrame;

/// A stateless energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude threshold. Frames at or above this are considered speech.
    /// Typical range: 0.01–0.05 for a close microphone.
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &AudioFrame) -> VadDecision {
        if frame.rms() >= self.threshold {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {}
}
