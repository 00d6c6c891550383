//! Audio turn buffer: turns a continuous frame stream into discrete utterances.
//!
//! ## States
//!
//! ```text
//!            speech ≥ min_speech              trailing silence / max length
//!  Silent ───────────────────────► Speaking ───────────────────────────────► Sealed
//!    ▲                                                                          │
//!    └──────────────────────────── take_sealed() ───────────────────────────────┘
//! ```
//!
//! Frames heard while `Silent` are dropped unless they form a speech onset
//! candidate; the candidate is bounded by `min_speech` and becomes the head
//! of the utterance once confirmed. While `Sealed`, frames are still
//! classified so onsets can be reported for barge-in, but nothing is
//! buffered until the orchestrator takes the utterance.

pub mod utterance;

use std::time::Duration;

use tracing::{debug, trace};

pub use utterance::{SealReason, Utterance};

use crate::{
    audio::AudioFrame,
    config::TurnBufferConfig,
    error::BufferError,
    vad::{EnergyVad, VoiceActivityDetector},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Silent,
    Speaking,
    Sealed,
}

/// State transitions reported by `TurnBuffer::ingest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    /// Voice activity held for the minimum speech duration.
    SpeechStarted,
    /// An utterance is ready for `take_sealed`.
    Sealed(SealReason),
}

pub struct TurnBuffer {
    config: TurnBufferConfig,
    vad: Box<dyn VoiceActivityDetector>,
    state: BufferState,
    /// Speech frames not yet long enough to open an utterance.
    onset: Vec<AudioFrame>,
    onset_len: Duration,
    /// Frames of the utterance being captured.
    frames: Vec<AudioFrame>,
    speech_len: Duration,
    silence_run: Duration,
    sealed: Option<Utterance>,
    /// An onset was already reported while sealed.
    held_onset: bool,
    next_id: u64,
}

impl TurnBuffer {
    /// Buffer with the default RMS energy detector.
    pub fn new(config: TurnBufferConfig) -> Self {
        let vad = EnergyVad::new(config.speech_threshold);
        Self::with_detector(config, Box::new(vad))
    }

    pub fn with_detector(config: TurnBufferConfig, vad: Box<dyn VoiceActivityDetector>) -> Self {
        Self {
            config,
            vad,
            state: BufferState::Silent,
            onset: Vec::new(),
            onset_len: Duration::ZERO,
            frames: Vec::new(),
            speech_len: Duration::ZERO,
            silence_run: Duration::ZERO,
            sealed: None,
            held_onset: false,
            next_id: 1,
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn config(&self) -> &TurnBufferConfig {
        &self.config
    }

    /// Validate, classify and (when relevant) buffer one frame.
    ///
    /// # Errors
    /// A malformed frame is discarded with a `BufferError`; the buffer is left
    /// exactly as it was.
    pub fn ingest(&mut self, frame: AudioFrame) -> Result<Option<BufferEvent>, BufferError> {
        self.validate(&frame)?;

        let is_speech = self.vad.classify(&frame).is_speech();
        let len = frame.duration();
        trace!(state = ?self.state, is_speech, rms = frame.rms(), "frame classified");

        let event = match self.state {
            BufferState::Silent => {
                if !is_speech {
                    self.onset.clear();
                    self.onset_len = Duration::ZERO;
                    return Ok(None);
                }
                self.onset.push(frame);
                self.onset_len += len;
                if self.onset_len < self.config.min_speech() {
                    return Ok(None);
                }
                self.frames = std::mem::take(&mut self.onset);
                self.speech_len = std::mem::take(&mut self.onset_len);
                self.silence_run = Duration::ZERO;
                self.state = BufferState::Speaking;
                debug!(onset_ms = self.speech_len.as_millis() as u64, "speech started");
                Some(BufferEvent::SpeechStarted)
            }

            BufferState::Speaking => {
                self.frames.push(frame);
                self.speech_len += len;
                if is_speech {
                    self.silence_run = Duration::ZERO;
                } else {
                    self.silence_run += len;
                }

                if self.silence_run >= self.config.trailing_silence() {
                    Some(BufferEvent::Sealed(self.seal(SealReason::TrailingSilence)))
                } else if self.speech_len >= self.config.max_utterance() {
                    Some(BufferEvent::Sealed(self.seal(SealReason::MaxDuration)))
                } else {
                    None
                }
            }

            BufferState::Sealed => {
                // Classification only: the frame itself is dropped.
                if !is_speech {
                    self.onset_len = Duration::ZERO;
                    self.held_onset = false;
                    return Ok(None);
                }
                self.onset_len += len;
                if self.held_onset || self.onset_len < self.config.min_speech() {
                    return Ok(None);
                }
                self.held_onset = true;
                Some(BufferEvent::SpeechStarted)
            }
        };

        Ok(event)
    }

    /// Hand over the sealed utterance, resetting the buffer to `Silent`.
    pub fn take_sealed(&mut self) -> Option<Utterance> {
        if self.state != BufferState::Sealed {
            return None;
        }
        let utterance = self.sealed.take();
        self.state = BufferState::Silent;
        self.onset.clear();
        self.onset_len = Duration::ZERO;
        self.held_onset = false;
        self.vad.reset();
        utterance
    }

    /// End of input: seal whatever speech is in progress.
    pub fn finish(&mut self) -> Option<BufferEvent> {
        self.onset.clear();
        self.onset_len = Duration::ZERO;
        match self.state {
            BufferState::Speaking => Some(BufferEvent::Sealed(self.seal(SealReason::EndOfStream))),
            _ => None,
        }
    }

    /// Drop everything, including an utterance waiting to be taken.
    pub fn reset(&mut self) {
        self.state = BufferState::Silent;
        self.onset.clear();
        self.onset_len = Duration::ZERO;
        self.frames.clear();
        self.speech_len = Duration::ZERO;
        self.silence_run = Duration::ZERO;
        self.sealed = None;
        self.held_onset = false;
        self.vad.reset();
    }

    fn seal(&mut self, reason: SealReason) -> SealReason {
        let utterance = Utterance {
            id: self.next_id,
            frames: std::mem::take(&mut self.frames),
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            reason,
        };
        self.next_id += 1;
        debug!(
            utterance_id = utterance.id,
            frames = utterance.frame_count(),
            duration_ms = self.speech_len.as_millis() as u64,
            ?reason,
            "utterance sealed"
        );
        self.speech_len = Duration::ZERO;
        self.silence_run = Duration::ZERO;
        self.onset_len = Duration::ZERO;
        self.held_onset = false;
        self.sealed = Some(utterance);
        self.state = BufferState::Sealed;
        reason
    }

    fn validate(&self, frame: &AudioFrame) -> Result<(), BufferError> {
        if frame.sample_rate != self.config.sample_rate {
            return Err(BufferError::SampleRate {
                expected: self.config.sample_rate,
                got: frame.sample_rate,
            });
        }
        if frame.channels != self.config.channels {
            return Err(BufferError::Channels {
                expected: self.config.channels,
                got: frame.channels,
            });
        }
        if frame.samples.is_empty() {
            return Err(BufferError::Empty);
        }
        if frame.samples.len() % frame.channels as usize != 0 {
            return Err(BufferError::Misaligned {
                samples: frame.samples.len(),
                channels: frame.channels,
            });
        }
        if frame.samples.iter().any(|s| !s.is_finite()) {
            return Err(BufferError::NonFinite);
        }
        Ok(())
    }
}

impl std::fmt::Debug for TurnBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnBuffer")
            .field("state", &self.state)
            .field("frames", &self.frames.len())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}
