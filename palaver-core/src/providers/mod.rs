//! Capability provider contracts: speech-to-text, language model, text-to-speech.
//!
//! Providers are opaque engines with their own latency. The orchestrator
//! calls them from the blocking pool, so every method here may block.
//! Implementations take `&self` and are shared read-only across sessions
//! through `Providers`; any per-call state belongs inside the call.

pub mod stub;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "ollama")]
pub use ollama::OllamaChat;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    audio::AudioFrame,
    buffering::Utterance,
    error::{GenerationError, SynthesisError, TranscriptionError},
    language::Language,
};

/// Cooperative cancellation signal shared between the orchestrator and a
/// running provider call.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One reply request: system prompt + recent transcript window.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub language: Language,
    pub model_id: String,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Text of the most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Lazily produced reply audio. Finite and not restartable.
pub type SynthesizedAudio = Box<dyn Iterator<Item = Result<AudioFrame, SynthesisError>> + Send>;

/// Contract for speech recognition backends.
pub trait SpeechToText: Send + Sync + 'static {
    /// Transcribe one sealed utterance. Empty text means "no speech".
    fn transcribe(&self, utterance: &Utterance, language: Language)
        -> Result<String, TranscriptionError>;
}

/// Contract for reply generation backends.
pub trait LanguageModel: Send + Sync + 'static {
    /// Produce a reply. Implementations that stream should poll `cancel`
    /// between chunks and return `GenerationError::Cancelled` once it is set.
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelFlag,
    ) -> Result<String, GenerationError>;

    /// Models the engine currently serves. Used for the startup availability check.
    fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        Ok(Vec::new())
    }
}

/// Contract for speech synthesis backends.
pub trait TextToSpeech: Send + Sync + 'static {
    /// Start synthesizing `text`. The first frame should be available before
    /// the whole reply is rendered.
    fn synthesize(&self, text: &str, language: Language)
        -> Result<SynthesizedAudio, SynthesisError>;
}

/// The three engines a session talks to, shared read-only across sessions.
#[derive(Clone)]
pub struct Providers {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
}

impl Providers {
    pub fn new<S, L, T>(stt: S, llm: L, tts: T) -> Self
    where
        S: SpeechToText,
        L: LanguageModel,
        T: TextToSpeech,
    {
        Self {
            stt: Arc::new(stt),
            llm: Arc::new(llm),
            tts: Arc::new(tts),
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}
