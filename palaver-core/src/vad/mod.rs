//! Voice Activity Detection (VAD) abstraction.
//!
//! The `VoiceActivityDetector` trait is the extensibility point of the turn
//! buffer: swap in `EnergyVad` (default) or any neural detector without
//! touching segmentation or the orchestrator.

pub mod energy;

pub use energy::EnergyVad;

use crate::audio::AudioFrame;

/// Whether a given audio frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The frame contains speech energy above threshold.
    Speech,
    /// The frame is below the speech threshold.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (smoothing windows, RNN hidden states).
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse a frame and return a speech/silence decision.
    ///
    /// The turn buffer only hands over frames that already passed format
    /// validation, so implementors may assume the configured rate and
    /// channel count.
    fn classify(&mut self, frame: &AudioFrame) -> VadDecision;

    /// Reset any internal state between utterances.
    fn reset(&mut self);
}
