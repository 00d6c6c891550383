//! `Orchestrator`: the per-session turn state machine.
//!
//! ## Turn phases
//!
//! ```text
//!         onset          sealed            text             reply          first frame
//!  Idle ─────────► Listening ─────► Transcribing ─────► Generating ─────► Synthesizing ─────► Playing
//!   ▲                 ▲                  │ empty / error      │ error / onset     │ onset         │
//!   │                 │                  ▼                    ▼                   ▼               │
//!   └─────────────────┼──────────────── Idle         Listening (onset)      Interrupted ◄────────┘
//!                     └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling
//!
//! One tokio task per session runs [`Orchestrator::run`]. Each loop
//! iteration selects, in priority order, between shutdown, the next input
//! frame, and progress of the single active stage. Input is polled first so
//! a barge-in is acted on within one frame. Provider calls run on the
//! blocking pool; the loop only ever waits on them through cancel-safe
//! futures (see `stage`).

pub mod diagnostics;
mod stage;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

use stage::{Playback, PlaybackOptions, ProviderCall, Stage, StageEvent};

use crate::{
    audio::{self, AudioFrame},
    buffering::{BufferEvent, BufferState, TurnBuffer},
    config::{ConversationConfig, SynthesisFallback},
    error::{GenerationError, PalaverError, Result, TranscriptionError},
    events::{SessionEvent, TurnOutcome},
    language::Language,
    providers::{CancelFlag, ChatMessage, GenerationRequest, Providers, Role},
    session::{SharedSession, Speaker, TurnPhase},
    telemetry::{RecordOutcome, TelemetryRecord, TelemetrySink, TurnMetrics},
};

/// Replies are logged truncated to this many characters.
const REPLY_PREVIEW_CHARS: usize = 100;

/// Book-keeping for the turn in flight.
struct Turn {
    number: u64,
    metrics: TurnMetrics,
    /// Synthesis failed and the fallback tone is playing; holds the error.
    fallback_for: Option<String>,
}

pub struct Orchestrator {
    session_id: String,
    language: Language,
    model_id: String,
    session: SharedSession,
    config: Arc<ConversationConfig>,
    providers: Providers,
    telemetry: Arc<dyn TelemetrySink>,
    events: broadcast::Sender<SessionEvent>,
    output: mpsc::Sender<AudioFrame>,
    buffer: TurnBuffer,
    stage: Stage,
    turn: Option<Turn>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl Orchestrator {
    pub fn new(
        session: SharedSession,
        config: Arc<ConversationConfig>,
        providers: Providers,
        telemetry: Arc<dyn TelemetrySink>,
        events: broadcast::Sender<SessionEvent>,
        output: mpsc::Sender<AudioFrame>,
    ) -> Self {
        let (session_id, language, model_id) = {
            let s = session.lock();
            (s.connection_id.clone(), s.language, s.model_id.clone())
        };
        let buffer = TurnBuffer::new(config.buffer.clone());
        Self {
            session_id,
            language,
            model_id,
            session,
            config,
            providers,
            telemetry,
            events,
            output,
            buffer,
            stage: Stage::None,
            turn: None,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    /// Replace the default energy-VAD buffer (custom detector, tests).
    pub fn with_buffer(mut self, buffer: TurnBuffer) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn diagnostics(&self) -> Arc<SessionDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    /// Drive the session until shutdown, or until input has closed and every
    /// captured turn has played out.
    ///
    /// # Errors
    /// `PalaverError::TransportClosed` when the output side is dropped while
    /// reply audio is still flowing. Provider failures never end the session.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<AudioFrame>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<()> {
        info!(
            language = %self.language,
            model = %self.model_id,
            "session started"
        );
        let mut input_open = true;

        let result = loop {
            if !input_open && self.stage.is_idle() && !self.try_start_turn() {
                break Ok(());
            }

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    debug!("shutdown requested");
                    break Ok(());
                }

                frame = input.recv(), if input_open => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => {
                        input_open = false;
                        self.on_input_closed();
                    }
                },

                event = self.stage.advance() => {
                    if let Err(e) = self.on_stage_event(event) {
                        break Err(e);
                    }
                }
            }
        };

        self.stage.cancel();
        let snap = self.diagnostics.snapshot();
        info!(
            turns = self.session.lock().turns,
            frames_in = snap.frames_in,
            frames_rejected = snap.frames_rejected,
            frames_out = snap.frames_out,
            barge_ins = snap.barge_ins,
            provider_errors = snap.provider_errors,
            "session ended"
        );
        result
    }

    // ── Input ────────────────────────────────────────────────────────────────

    fn on_frame(&mut self, frame: AudioFrame) {
        SessionDiagnostics::bump(&self.diagnostics.frames_in);
        match self.buffer.ingest(frame) {
            Ok(None) => {}
            Ok(Some(BufferEvent::SpeechStarted)) => self.on_speech_onset(),
            Ok(Some(BufferEvent::Sealed(_))) => {
                self.try_start_turn();
            }
            Err(e) => {
                SessionDiagnostics::bump(&self.diagnostics.frames_rejected);
                let phase = self.phase();
                warn!(?phase, error = %e, "discarding malformed frame");
                self.telemetry.record(
                    TelemetryRecord::new(
                        &self.session_id,
                        self.turn_number(),
                        phase,
                        RecordOutcome::FrameRejected,
                    )
                    .with_detail(e.to_string()),
                );
            }
        }
    }

    fn on_input_closed(&mut self) {
        info!(phase = ?self.phase(), "input closed; draining");
        if let Some(BufferEvent::Sealed(_)) = self.buffer.finish() {
            self.try_start_turn();
        }
    }

    fn on_speech_onset(&mut self) {
        SessionDiagnostics::bump(&self.diagnostics.speech_onsets);
        let barge_in = self.config.barge_in;

        match self.phase() {
            TurnPhase::Idle => self.set_phase(TurnPhase::Listening),

            TurnPhase::Generating if barge_in.interrupts_generation() => {
                SessionDiagnostics::bump(&self.diagnostics.barge_ins);
                info!(turn = self.turn_number(), "speech during generation; reply cancelled");
                self.stage.cancel();
                self.close_turn(
                    TurnOutcome::Interrupted,
                    RecordOutcome::Interrupted,
                    Some("speech during generation".into()),
                );
                self.set_phase(TurnPhase::Listening);
                self.resume_captured();
            }

            TurnPhase::Synthesizing | TurnPhase::Playing if barge_in.interrupts_playback() => {
                SessionDiagnostics::bump(&self.diagnostics.barge_ins);
                info!(
                    turn = self.turn_number(),
                    delivered = self.turn.as_ref().map_or(0, |t| t.metrics.frames_delivered),
                    "barge-in; playback cancelled"
                );
                self.stage.cancel();
                self.set_phase(TurnPhase::Interrupted);
                self.close_turn(
                    TurnOutcome::Interrupted,
                    RecordOutcome::Interrupted,
                    Some("speech during playback".into()),
                );
                self.set_phase(TurnPhase::Listening);
                self.resume_captured();
            }

            // Transcribing, or barge-in disabled for this phase: the new
            // speech is captured and handled after the current turn.
            _ => {}
        }
    }

    // ── Turn stages ──────────────────────────────────────────────────────────

    /// Hand a sealed utterance to transcription if nothing else is in flight.
    fn try_start_turn(&mut self) -> bool {
        if !self.stage.is_idle()
            || self.buffer.state() != BufferState::Sealed
            || self.phase().is_busy()
        {
            return false;
        }
        let Some(utterance) = self.buffer.take_sealed() else {
            return false;
        };

        let number = {
            let mut session = self.session.lock();
            session.turns += 1;
            session.turns
        };
        SessionDiagnostics::bump(&self.diagnostics.utterances);
        SessionDiagnostics::bump(&self.diagnostics.transcriptions);

        let metrics = TurnMetrics {
            utterance_ms: utterance.duration().as_millis() as u64,
            utterance_frames: utterance.frame_count(),
            ..TurnMetrics::default()
        };
        info!(
            turn = number,
            utterance_id = utterance.id,
            duration_ms = metrics.utterance_ms,
            frames = metrics.utterance_frames,
            reason = ?utterance.reason,
            "transcribing utterance"
        );
        self.turn = Some(Turn {
            number,
            metrics,
            fallback_for: None,
        });

        let stt = Arc::clone(&self.providers.stt);
        let language = self.language;
        self.stage = Stage::Transcribing(ProviderCall::spawn(
            self.config.transcription_timeout(),
            CancelFlag::new(),
            move || stt.transcribe(&utterance, language),
        ));
        self.set_phase(TurnPhase::Transcribing);
        true
    }

    fn on_stage_event(&mut self, event: StageEvent) -> Result<()> {
        let elapsed_ms = self.stage.elapsed().as_millis() as u64;

        match event {
            StageEvent::Transcribed(result) => {
                self.stage = Stage::None;
                if let Some(turn) = self.turn.as_mut() {
                    turn.metrics.transcription_ms = Some(elapsed_ms);
                }
                self.on_transcribed(result);
            }

            StageEvent::Generated(result) => {
                self.stage = Stage::None;
                if let Some(turn) = self.turn.as_mut() {
                    turn.metrics.generation_ms = Some(elapsed_ms);
                }
                self.on_generated(result);
            }

            StageEvent::Delivered { first } => {
                SessionDiagnostics::bump(&self.diagnostics.frames_out);
                if let Some(turn) = self.turn.as_mut() {
                    turn.metrics.frames_delivered += 1;
                    if first && turn.metrics.first_frame_ms.is_none() {
                        turn.metrics.first_frame_ms = Some(elapsed_ms);
                        debug!(turn = turn.number, first_frame_ms = elapsed_ms, "first reply frame");
                    }
                }
                if first {
                    self.set_phase(TurnPhase::Playing);
                }
            }

            StageEvent::SynthesisFinished { truncated } => {
                self.stage = Stage::None;
                let fallback_for = self.turn.as_mut().and_then(|t| t.fallback_for.take());
                if let Some(detail) = fallback_for {
                    self.finish_turn(TurnOutcome::Failed, RecordOutcome::Failed, Some(detail));
                } else if truncated {
                    self.finish_turn(
                        TurnOutcome::Completed,
                        RecordOutcome::Truncated,
                        Some("synthesis budget exceeded".into()),
                    );
                } else {
                    info!(
                        turn = self.turn_number(),
                        frames = self.turn.as_ref().map_or(0, |t| t.metrics.frames_delivered),
                        "reply played"
                    );
                    self.finish_turn(TurnOutcome::Completed, RecordOutcome::Completed, None);
                }
            }

            StageEvent::SynthesisFailed(e) => {
                self.stage = Stage::None;
                let fallback_pending = self.config.synthesis_fallback == SynthesisFallback::Tone
                    && self.turn.as_ref().is_some_and(|t| t.fallback_for.is_none());
                if fallback_pending {
                    SessionDiagnostics::bump(&self.diagnostics.provider_errors);
                    warn!(turn = self.turn_number(), error = %e, "synthesis failed; playing fallback tone");
                    if let Some(turn) = self.turn.as_mut() {
                        turn.fallback_for = Some(e.to_string());
                    }
                    self.stage = Stage::Speaking(Playback::prerendered(
                        audio::fallback_tone(self.config.buffer.sample_rate),
                        self.output.clone(),
                        self.playback_options(),
                    ));
                } else {
                    self.fail_turn(e.to_string());
                }
            }

            StageEvent::TransportClosed => {
                self.stage.cancel();
                error!(phase = ?self.phase(), "transport output closed");
                return Err(PalaverError::TransportClosed(self.session_id.clone()));
            }
        }
        Ok(())
    }

    fn on_transcribed(&mut self, result: std::result::Result<String, TranscriptionError>) {
        let text = match result {
            Ok(text) => text,
            Err(e) => return self.fail_turn(e.to_string()),
        };
        let text = text.trim();
        if text.is_empty() {
            info!(turn = self.turn_number(), "no speech in utterance");
            return self.finish_turn(TurnOutcome::NoSpeech, RecordOutcome::NoSpeech, None);
        }
        info!(turn = self.turn_number(), transcript = %text, "transcribed");
        self.append(Speaker::User, text);
        self.start_generation();
    }

    fn start_generation(&mut self) {
        let messages = {
            let session = self.session.lock();
            let window = session.transcript.window(self.config.context_window);
            let mut messages = Vec::with_capacity(window.len() + 1);
            messages.push(ChatMessage::new(Role::System, self.language.system_prompt()));
            messages.extend(
                window
                    .iter()
                    .map(|entry| ChatMessage::new(role_of(entry.speaker), entry.text.clone())),
            );
            messages
        };
        let request = GenerationRequest {
            messages,
            language: self.language,
            model_id: self.model_id.clone(),
            max_tokens: self.config.max_reply_tokens,
        };
        SessionDiagnostics::bump(&self.diagnostics.generations);
        debug!(
            turn = self.turn_number(),
            context = request.messages.len() - 1,
            model = %request.model_id,
            "requesting reply"
        );

        let llm = Arc::clone(&self.providers.llm);
        let cancel = CancelFlag::new();
        let provider_cancel = cancel.clone();
        self.stage = Stage::Generating(ProviderCall::spawn(
            self.config.generation_timeout(),
            cancel,
            move || llm.generate(&request, &provider_cancel),
        ));
        self.set_phase(TurnPhase::Generating);
    }

    fn on_generated(&mut self, result: std::result::Result<String, GenerationError>) {
        let reply = match result {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => {
                let e = GenerationError::MalformedResponse("empty reply".into());
                return self.fail_turn(e.to_string());
            }
            Err(e) => return self.fail_turn(e.to_string()),
        };
        info!(turn = self.turn_number(), reply = %preview(&reply), "reply generated");
        self.append(Speaker::Assistant, &reply);

        self.stage = Stage::Speaking(Playback::spawn(
            Arc::clone(&self.providers.tts),
            reply,
            self.language,
            self.output.clone(),
            self.playback_options(),
        ));
        self.set_phase(TurnPhase::Synthesizing);
    }

    // ── Turn endings ─────────────────────────────────────────────────────────

    /// Provider failure: log with context, record, back to `Idle`. The
    /// transcript is left as it was before the failed stage.
    fn fail_turn(&mut self, detail: String) {
        SessionDiagnostics::bump(&self.diagnostics.provider_errors);
        error!(
            turn = self.turn_number(),
            phase = ?self.phase(),
            error = %detail,
            "turn failed"
        );
        self.finish_turn(TurnOutcome::Failed, RecordOutcome::Failed, Some(detail));
    }

    fn finish_turn(&mut self, outcome: TurnOutcome, record: RecordOutcome, detail: Option<String>) {
        self.close_turn(outcome, record, detail);
        self.set_phase(TurnPhase::Idle);
        self.resume_captured();
    }

    /// Pick up speech the buffer captured while the last turn ran. An
    /// utterance sealed behind a busy stage must start here: a sealed buffer
    /// seals nothing further until it is taken.
    fn resume_captured(&mut self) {
        match self.buffer.state() {
            BufferState::Sealed => {
                self.try_start_turn();
            }
            BufferState::Speaking => self.set_phase(TurnPhase::Listening),
            BufferState::Silent => {}
        }
    }

    /// Record the turn's outcome without touching the phase.
    fn close_turn(&mut self, outcome: TurnOutcome, record: RecordOutcome, detail: Option<String>) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        let mut entry = TelemetryRecord::new(&self.session_id, turn.number, self.phase(), record)
            .with_metrics(turn.metrics);
        entry.detail = detail;
        self.telemetry.record(entry);
        let _ = self.events.send(SessionEvent::TurnFinished {
            turn: turn.number,
            outcome,
        });
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn phase(&self) -> TurnPhase {
        self.session.lock().phase
    }

    fn set_phase(&self, to: TurnPhase) {
        let from = std::mem::replace(&mut self.session.lock().phase, to);
        if from != to {
            debug!(?from, ?to, "phase changed");
            let _ = self.events.send(SessionEvent::PhaseChanged { from, to });
        }
    }

    fn append(&self, speaker: Speaker, text: &str) {
        self.session.lock().transcript.push(speaker, text);
        let _ = self.events.send(SessionEvent::TranscriptAppended {
            speaker,
            text: text.to_string(),
        });
    }

    fn turn_number(&self) -> u64 {
        self.turn.as_ref().map_or(0, |t| t.number)
    }

    fn playback_options(&self) -> PlaybackOptions {
        PlaybackOptions {
            pacing: self.config.pacing,
            first_frame_timeout: self.config.first_frame_timeout(),
            synthesis_timeout: self.config.synthesis_timeout(),
        }
    }
}

fn role_of(speaker: Speaker) -> Role {
    match speaker {
        Speaker::User => Role::User,
        Speaker::Assistant => Role::Assistant,
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(REPLY_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
