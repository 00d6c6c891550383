//! # palaver-core
//!
//! Turn-based voice conversation engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Transport ──frames_in──► TurnBuffer(VAD) ──Utterance──► Orchestrator (one task per session)
//!                                                              │
//!                                   SpeechToText ─► LanguageModel ─► TextToSpeech
//!                                         (spawn_blocking, cancel flag, timeouts)
//!                                                              │
//! Transport ◄──frames_out── Playback (paced, barge-in aware) ◄─┘
//! ```
//!
//! Sessions are created and torn down through [`SessionManager`]. Providers
//! are injected once as [`Providers`] and shared read-only by every session.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod language;
pub mod providers;
pub mod session;
pub mod telemetry;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::AudioFrame;
pub use buffering::{BufferEvent, SealReason, TurnBuffer, Utterance};
pub use config::{BargeInMode, ConversationConfig, PlaybackPacing, SynthesisFallback, TurnBufferConfig};
pub use engine::Orchestrator;
pub use error::{
    BufferError, GenerationError, PalaverError, Result, SynthesisError, TranscriptionError,
};
pub use events::{SessionEvent, TurnOutcome};
pub use language::Language;
pub use providers::{
    CancelFlag, ChatMessage, GenerationRequest, LanguageModel, Providers, Role, SpeechToText,
    SynthesizedAudio, TextToSpeech,
};
pub use session::{SessionHandle, SessionManager, Speaker, Transcript, TranscriptEntry, TurnPhase};
pub use telemetry::{JsonlSink, MemorySink, NullSink, TelemetryRecord, TelemetrySink};

#[cfg(feature = "ollama")]
pub use providers::OllamaChat;
