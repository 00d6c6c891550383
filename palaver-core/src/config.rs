//! Read-only configuration consumed by the turn buffer and the orchestrator.
//!
//! The host owns loading and persistence; the core only validates and reads.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PalaverError, Result};
use crate::language::Language;

/// Voice-activity and segmentation settings for the audio turn buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct TurnBufferConfig {
    /// Sample rate every inbound frame must carry (Hz). Default: 16000.
    pub sample_rate: u32,
    /// Channel count every inbound frame must carry. Default: 1.
    pub channels: u16,
    /// RMS level at or above which a frame counts as speech. Default: 0.02.
    pub speech_threshold: f32,
    /// Contiguous speech needed before an utterance opens. Default: 60 ms.
    pub min_speech_ms: u32,
    /// Trailing silence that seals an utterance. Default: 600 ms.
    pub trailing_silence_ms: u32,
    /// Hard cap on utterance length. Default: 30 s.
    pub max_utterance_ms: u32,
}

impl Default for TurnBufferConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            speech_threshold: 0.02,
            min_speech_ms: 60,
            trailing_silence_ms: 600,
            max_utterance_ms: 30_000,
        }
    }
}

impl TurnBufferConfig {
    pub fn min_speech(&self) -> Duration {
        Duration::from_millis(self.min_speech_ms as u64)
    }

    pub fn trailing_silence(&self) -> Duration {
        Duration::from_millis(self.trailing_silence_ms as u64)
    }

    pub fn max_utterance(&self) -> Duration {
        Duration::from_millis(self.max_utterance_ms as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PalaverError::Config("sample rate must be greater than zero".into()));
        }
        if self.channels == 0 {
            return Err(PalaverError::Config("channel count must be greater than zero".into()));
        }
        if !self.speech_threshold.is_finite() || self.speech_threshold <= 0.0 {
            return Err(PalaverError::Config(format!(
                "speech threshold must be positive, got {}",
                self.speech_threshold
            )));
        }
        if self.trailing_silence_ms == 0 {
            return Err(PalaverError::Config(
                "trailing silence must be greater than zero".into(),
            ));
        }
        if self.max_utterance_ms <= self.min_speech_ms {
            return Err(PalaverError::Config(format!(
                "max utterance ({} ms) must exceed min speech ({} ms)",
                self.max_utterance_ms, self.min_speech_ms
            )));
        }
        Ok(())
    }
}

/// Which in-flight stages a user speech onset may pre-empt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BargeInMode {
    /// The assistant always finishes its reply.
    Disabled,
    /// Speech pre-empts synthesis and playback only.
    Playback,
    /// Speech also cancels a generation that is still running.
    #[default]
    GenerationAndPlayback,
}

impl BargeInMode {
    pub fn interrupts_playback(self) -> bool {
        !matches!(self, BargeInMode::Disabled)
    }

    pub fn interrupts_generation(self) -> bool {
        matches!(self, BargeInMode::GenerationAndPlayback)
    }
}

/// How synthesized frames are released to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPacing {
    /// Release each frame once the previous one has finished playing.
    #[default]
    Realtime,
    /// Hand frames over as fast as the transport accepts them.
    Immediate,
}

/// What the user hears when synthesis fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisFallback {
    #[default]
    Silence,
    /// A half-second 440 Hz tone.
    Tone,
}

/// Everything the orchestrator reads for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ConversationConfig {
    /// Language-model identifier passed on every generation request.
    pub model_id: String,
    /// Language for sessions opened without an explicit one.
    pub language: Language,
    pub buffer: TurnBufferConfig,
    /// Most recent transcript entries sent as generation context. Default: 20.
    pub context_window: usize,
    /// Upper bound on reply length in tokens. Default: 200.
    pub max_reply_tokens: Option<u32>,
    pub transcription_timeout_ms: u64,
    pub generation_timeout_ms: u64,
    /// Maximum wait for the first synthesized frame. Default: 15 s.
    pub first_frame_timeout_ms: u64,
    /// Total synthesis budget; playback is truncated past it. Default: 30 s.
    pub synthesis_timeout_ms: u64,
    pub barge_in: BargeInMode,
    pub pacing: PlaybackPacing,
    pub synthesis_fallback: SynthesisFallback,
    /// Capacity of the transport → session frame queue. Default: 256.
    pub input_queue_frames: usize,
    /// Capacity of the session → transport frame queue. Default: 32.
    pub output_queue_frames: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            model_id: "granite3-dense:latest".into(),
            language: Language::English,
            buffer: TurnBufferConfig::default(),
            context_window: 20,
            max_reply_tokens: Some(200),
            transcription_timeout_ms: 30_000,
            generation_timeout_ms: 60_000,
            first_frame_timeout_ms: 15_000,
            synthesis_timeout_ms: 30_000,
            barge_in: BargeInMode::default(),
            pacing: PlaybackPacing::default(),
            synthesis_fallback: SynthesisFallback::default(),
            input_queue_frames: 256,
            output_queue_frames: 32,
        }
    }
}

impl ConversationConfig {
    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_millis(self.transcription_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn first_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.first_frame_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        if self.model_id.trim().is_empty() {
            return Err(PalaverError::Config("model id must not be empty".into()));
        }
        if self.context_window == 0 {
            return Err(PalaverError::Config(
                "context window must hold at least one entry".into(),
            ));
        }
        if self.input_queue_frames == 0 || self.output_queue_frames == 0 {
            return Err(PalaverError::Config("frame queues must have capacity".into()));
        }
        for (name, ms) in [
            ("transcription", self.transcription_timeout_ms),
            ("generation", self.generation_timeout_ms),
            ("first frame", self.first_frame_timeout_ms),
            ("synthesis", self.synthesis_timeout_ms),
        ] {
            if ms == 0 {
                return Err(PalaverError::Config(format!("{name} timeout must be non-zero")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ConversationConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn rejects_max_utterance_not_above_min_speech() {
        let mut cfg = TurnBufferConfig::default();
        cfg.max_utterance_ms = cfg.min_speech_ms;
        assert!(matches!(cfg.validate(), Err(PalaverError::Config(_))));
    }

    #[test]
    fn rejects_empty_model_id() {
        let cfg = ConversationConfig {
            model_id: "  ".into(),
            ..ConversationConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn barge_in_modes_cover_the_expected_stages() {
        assert!(!BargeInMode::Disabled.interrupts_playback());
        assert!(BargeInMode::Playback.interrupts_playback());
        assert!(!BargeInMode::Playback.interrupts_generation());
        assert!(BargeInMode::GenerationAndPlayback.interrupts_generation());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: ConversationConfig = serde_json::from_str(
            r#"{"modelId":"llama3","buffer":{"trailingSilenceMs":800},"bargeIn":"playback"}"#,
        )
        .expect("deserialize config");
        assert_eq!(cfg.model_id, "llama3");
        assert_eq!(cfg.buffer.trailing_silence_ms, 800);
        assert_eq!(cfg.buffer.sample_rate, 16_000);
        assert_eq!(cfg.barge_in, BargeInMode::Playback);
        assert_eq!(cfg.context_window, 20);
    }
}
