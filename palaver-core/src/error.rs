use std::time::Duration;

use thiserror::Error;

/// Speech-to-text provider failure or audio it could not accept.
#[derive(Debug, Clone, Error)]
pub enum TranscriptionError {
    #[error("speech-to-text provider failed: {0}")]
    Provider(String),

    #[error("malformed audio for transcription: {0}")]
    MalformedAudio(String),

    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
}

/// Language-model provider failure.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("language model unavailable: {0}")]
    Unavailable(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response from language model: {0}")]
    MalformedResponse(String),

    #[error("generation cancelled")]
    Cancelled,
}

/// Text-to-speech provider failure.
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("text-to-speech provider failed: {0}")]
    Provider(String),

    #[error("no audio produced within {0:?}")]
    Timeout(Duration),

    #[error("synthesis cancelled")]
    Cancelled,
}

/// A frame the turn buffer refused. The buffer state is untouched when this
/// is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BufferError {
    #[error("expected {expected} Hz audio, got {got} Hz")]
    SampleRate { expected: u32, got: u32 },

    #[error("expected {expected} channel(s), got {got}")]
    Channels { expected: u16, got: u16 },

    #[error("frame contains no samples")]
    Empty,

    #[error("frame has {samples} samples, not a multiple of {channels} channels")]
    Misaligned { samples: usize, channels: u16 },

    #[error("frame contains non-finite samples")]
    NonFinite,
}

/// All errors produced by palaver-core.
#[derive(Debug, Error)]
pub enum PalaverError {
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("session already open: {0}")]
    SessionExists(String),

    #[error("no open session: {0}")]
    SessionNotFound(String),

    #[error("transport closed for session {0}")]
    TransportClosed(String),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PalaverError>;
