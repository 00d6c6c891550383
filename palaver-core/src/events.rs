//! Session events broadcast to hosts.
//!
//! Each `SessionHandle` carries a `broadcast::Receiver<SessionEvent>`;
//! slow subscribers lag and lose events, they never stall the session.

use serde::{Deserialize, Serialize};

use crate::session::{Speaker, TurnPhase};

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The session moved between turn phases.
    #[serde(rename_all = "camelCase")]
    PhaseChanged { from: TurnPhase, to: TurnPhase },

    /// A line was appended to the transcript.
    #[serde(rename_all = "camelCase")]
    TranscriptAppended { speaker: Speaker, text: String },

    /// A turn ended, successfully or not.
    #[serde(rename_all = "camelCase")]
    TurnFinished { turn: u64, outcome: TurnOutcome },
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Reply audio fully delivered.
    Completed,
    /// Transcription produced no text; nothing was generated.
    NoSpeech,
    /// The user barged in.
    Interrupted,
    Failed,
}
