//! Per-connection conversation state.
//!
//! A `Session` lives from connection open to close. Its orchestrator is the
//! only writer; everyone else (the manager, hosts, tests) reads snapshots
//! through the shared handle.

pub mod manager;
pub mod transcript;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use manager::{SessionHandle, SessionManager};
pub use transcript::{Speaker, Transcript, TranscriptEntry};

use crate::language::Language;

/// Where a session's current turn stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    /// No utterance in flight.
    #[default]
    Idle,
    /// The user is speaking and the buffer is capturing.
    Listening,
    Transcribing,
    Generating,
    Synthesizing,
    /// Reply audio is flowing to the transport.
    Playing,
    /// The user barged in over the reply.
    Interrupted,
}

impl TurnPhase {
    /// A turn stage is active.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            TurnPhase::Transcribing
                | TurnPhase::Generating
                | TurnPhase::Synthesizing
                | TurnPhase::Playing
        )
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: String,
    pub language: Language,
    pub model_id: String,
    pub transcript: Transcript,
    pub phase: TurnPhase,
    /// Turns started so far (utterances handed to transcription).
    pub turns: u64,
    pub opened_at: DateTime<Utc>,
}

impl Session {
    pub fn new(connection_id: impl Into<String>, language: Language, model_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            language,
            model_id: model_id.into(),
            transcript: Transcript::new(),
            phase: TurnPhase::Idle,
            turns: 0,
            opened_at: Utc::now(),
        }
    }
}

/// Shared, lock-protected session. Only the session's orchestrator writes.
pub type SharedSession = Arc<Mutex<Session>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_idle_with_empty_transcript() {
        let session = Session::new("conn-1", Language::Spanish, "llama3");
        assert_eq!(session.phase, TurnPhase::Idle);
        assert!(session.transcript.is_empty());
        assert_eq!(session.turns, 0);
        assert_eq!(session.language, Language::Spanish);
    }

    #[test]
    fn busy_phases() {
        assert!(!TurnPhase::Idle.is_busy());
        assert!(!TurnPhase::Listening.is_busy());
        assert!(!TurnPhase::Interrupted.is_busy());
        assert!(TurnPhase::Generating.is_busy());
        assert!(TurnPhase::Playing.is_busy());
    }

    #[test]
    fn phase_serializes_lowercase() {
        let json = serde_json::to_string(&TurnPhase::Synthesizing).expect("serialize phase");
        assert_eq!(json, r#""synthesizing""#);
    }
}
