//! Scripted providers and frame helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use palaver_core::{
    AudioFrame, CancelFlag, ConversationConfig, GenerationError, GenerationRequest, Language,
    LanguageModel, MemorySink, PlaybackPacing, Providers, SealReason, SessionEvent,
    SessionManager, SpeechToText, SynthesisError, SynthesizedAudio, TextToSpeech,
    TranscriptionError, TurnPhase, Utterance,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

pub const RATE: u32 = 16_000;
pub const FRAME_MS: u64 = 20;

/// Generous upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

fn samples_for(ms: u64) -> usize {
    (RATE as u64 * ms / 1000) as usize
}

pub fn loud_frame() -> AudioFrame {
    AudioFrame::mono(vec![0.5; samples_for(FRAME_MS)], RATE, Duration::ZERO)
}

pub fn silent_frame() -> AudioFrame {
    AudioFrame::mono(vec![0.0; samples_for(FRAME_MS)], RATE, Duration::ZERO)
}

/// Send `ms` of speech-level audio as 20 ms frames.
pub async fn speak(tx: &mpsc::Sender<AudioFrame>, ms: u64) {
    for _ in 0..ms / FRAME_MS {
        tx.send(loud_frame()).await.expect("session input open");
    }
}

/// Send `ms` of silence as 20 ms frames.
pub async fn pause(tx: &mpsc::Sender<AudioFrame>, ms: u64) {
    for _ in 0..ms / FRAME_MS {
        tx.send(silent_frame()).await.expect("session input open");
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Returns scripted transcripts in order, then `"again"` forever.
pub struct ScriptedStt {
    script: Mutex<VecDeque<Result<String, TranscriptionError>>>,
    delay: Duration,
    pub calls: AtomicUsize,
    /// (duration, seal reason) of every utterance received.
    pub heard: Mutex<Vec<(Duration, SealReason)>>,
}

impl ScriptedStt {
    pub fn new(script: Vec<Result<String, TranscriptionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            heard: Mutex::new(Vec::new()),
        }
    }

    pub fn saying(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpeechToText for ScriptedStt {
    fn transcribe(
        &self,
        utterance: &Utterance,
        _language: Language,
    ) -> Result<String, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.heard.lock().push((utterance.duration(), utterance.reason));
        thread::sleep(self.delay);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("again".to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(GenerationError),
    /// Block until cancelled (bounded by `WAIT`).
    Hang,
}

pub struct ScriptedLlm {
    script: Mutex<VecDeque<Reply>>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub cancellations_seen: AtomicUsize,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            cancellations_seen: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![Reply::Text(text.to_string())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LanguageModel for ScriptedLlm {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelFlag,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        thread::sleep(self.delay);
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Reply::Text("okay".to_string()));
        match next {
            Reply::Text(text) => Ok(text),
            Reply::Fail(e) => Err(e),
            Reply::Hang => {
                let start = Instant::now();
                while !cancel.is_cancelled() && start.elapsed() < WAIT {
                    thread::sleep(Duration::from_millis(5));
                }
                if cancel.is_cancelled() {
                    self.cancellations_seen.fetch_add(1, Ordering::SeqCst);
                }
                Err(GenerationError::Cancelled)
            }
        }
    }
}

/// Emits `frames` frames of `frame_ms` each; frame `i` is timestamped
/// `i * frame_ms`, which tests use to identify it.
pub struct ScriptedTts {
    pub frames: usize,
    pub frame_ms: u64,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl ScriptedTts {
    pub fn new(frames: usize, frame_ms: u64) -> Self {
        Self {
            frames,
            frame_ms,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0, FRAME_MS)
        }
    }
}

impl TextToSpeech for ScriptedTts {
    fn synthesize(&self, _text: &str, _language: Language) -> Result<SynthesizedAudio, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SynthesisError::Provider("voice model missing".into()));
        }
        let frame_ms = self.frame_ms;
        let len = samples_for(frame_ms);
        Ok(Box::new((0..self.frames).map(move |i| {
            Ok(AudioFrame::mono(
                vec![0.1; len],
                RATE,
                Duration::from_millis(i as u64 * frame_ms),
            ))
        })))
    }
}

pub fn providers(stt: &Arc<ScriptedStt>, llm: &Arc<ScriptedLlm>, tts: &Arc<ScriptedTts>) -> Providers {
    Providers {
        stt: stt.clone(),
        llm: llm.clone(),
        tts: tts.clone(),
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Short silences and immediate playback keep tests fast.
pub fn test_config() -> ConversationConfig {
    let mut config = ConversationConfig::default();
    config.buffer.trailing_silence_ms = 200;
    config.pacing = PlaybackPacing::Immediate;
    config.transcription_timeout_ms = 3_000;
    config.generation_timeout_ms = 3_000;
    config.first_frame_timeout_ms = 3_000;
    config.synthesis_timeout_ms = 3_000;
    config
}

pub fn manager(config: ConversationConfig, providers: Providers, sink: &Arc<MemorySink>) -> SessionManager {
    SessionManager::new(config, providers, sink.clone()).expect("valid config")
}

/// Wait for the first event matching `pred`, returning every event seen up to
/// and including it.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                panic!("event stream closed; seen so far: {seen:?}")
            }
            Err(_) => panic!("timed out waiting for event; seen so far: {seen:?}"),
        }
    }
}

pub fn is_phase(to: TurnPhase) -> impl Fn(&SessionEvent) -> bool {
    move |event| matches!(event, SessionEvent::PhaseChanged { to: t, .. } if *t == to)
}

pub fn is_turn_finished(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::TurnFinished { .. })
}

/// The phases entered, in order.
pub fn phases(events: &[SessionEvent]) -> Vec<TurnPhase> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

pub async fn recv_frame(out: &mut mpsc::Receiver<AudioFrame>) -> AudioFrame {
    tokio::time::timeout(WAIT, out.recv())
        .await
        .expect("timed out waiting for an output frame")
        .expect("output closed")
}
