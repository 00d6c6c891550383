//! Placeholder providers that exercise the full turn loop without real engines.
//!
//! Deterministic output makes them useful for development hosts and for
//! wiring tests: `StubTranscriber` describes the audio it was given,
//! `EchoModel` repeats the user back, `ToneSynthesizer` renders a reply as a
//! tone whose length follows the word count.

use std::f32::consts::TAU;
use std::time::Duration;

use tracing::debug;

use crate::audio::AudioFrame;
use crate::buffering::Utterance;
use crate::error::{GenerationError, SynthesisError, TranscriptionError};
use crate::language::Language;
use crate::providers::{
    CancelFlag, GenerationRequest, LanguageModel, SpeechToText, SynthesizedAudio, TextToSpeech,
};

/// Minimum utterance length the stub treats as speech (10 ms at 16 kHz).
const MIN_SAMPLES: usize = 160;

/// Echo-style transcriber: `"[stub: <N> ms of audio]"`.
#[derive(Debug, Default)]
pub struct StubTranscriber;

impl SpeechToText for StubTranscriber {
    fn transcribe(
        &self,
        utterance: &Utterance,
        _language: Language,
    ) -> Result<String, TranscriptionError> {
        let samples: usize = utterance.frames.iter().map(|f| f.samples.len()).sum();
        if samples < MIN_SAMPLES {
            return Ok(String::new());
        }
        Ok(format!(
            "[stub: {} ms of audio]",
            utterance.duration().as_millis()
        ))
    }
}

/// Replies by repeating the latest user message.
#[derive(Debug, Default)]
pub struct EchoModel;

impl LanguageModel for EchoModel {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelFlag,
    ) -> Result<String, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let heard = request.last_user_message().unwrap_or_default();
        let reply = match request.language {
            Language::English => format!("You said: {heard}"),
            Language::Spanish => format!("Dijiste: {heard}"),
        };
        Ok(reply)
    }

    fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        Ok(vec!["echo".into()])
    }
}

/// Renders text as a 220 Hz tone, `per_word` long for each word.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub per_word: Duration,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_ms: 20,
            per_word: Duration::from_millis(120),
        }
    }
}

impl TextToSpeech for ToneSynthesizer {
    fn synthesize(&self, text: &str, _language: Language) -> Result<SynthesizedAudio, SynthesisError> {
        let words = text.split_whitespace().count();
        if words == 0 {
            return Err(SynthesisError::Provider("nothing to synthesize".into()));
        }
        let total = (self.per_word.as_secs_f64() * words as f64 * self.sample_rate as f64) as usize;
        let frame_len = (self.sample_rate as usize * self.frame_ms as usize / 1000).max(1);
        debug!(words, total_samples = total, "ToneSynthesizer::synthesize");
        Ok(Box::new(ToneFrames {
            sample_rate: self.sample_rate,
            frame_len,
            total,
            produced: 0,
        }))
    }
}

/// Frames are rendered on demand, one per `next()`.
struct ToneFrames {
    sample_rate: u32,
    frame_len: usize,
    total: usize,
    produced: usize,
}

impl Iterator for ToneFrames {
    type Item = Result<AudioFrame, SynthesisError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.produced >= self.total {
            return None;
        }
        let len = self.frame_len.min(self.total - self.produced);
        let start = self.produced;
        let samples = (start..start + len)
            .map(|n| 0.3 * (TAU * 220.0 * n as f32 / self.sample_rate as f32).sin())
            .collect();
        let timestamp = Duration::from_secs_f64(start as f64 / self.sample_rate as f64);
        self.produced += len;
        Some(Ok(AudioFrame::mono(samples, self.sample_rate, timestamp)))
    }
}
