//! The single active stage of a turn and how the session loop waits on it.
//!
//! Every `advance()` future is cancel-safe: the session loop drops it
//! whenever an input frame or shutdown wins the `select!`, and the next call
//! resumes where the previous one stopped.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::audio::AudioFrame;
use crate::config::PlaybackPacing;
use crate::error::{GenerationError, SynthesisError, TranscriptionError};
use crate::language::Language;
use crate::providers::{CancelFlag, TextToSpeech};

/// Frames synthesized ahead of playback before the producer blocks.
const SYNTH_AHEAD_FRAMES: usize = 64;

/// What a stage reported when it made progress.
#[derive(Debug)]
pub(crate) enum StageEvent {
    Transcribed(Result<String, TranscriptionError>),
    Generated(Result<String, GenerationError>),
    /// One reply frame was handed to the transport.
    Delivered { first: bool },
    /// Reply audio exhausted (or cut at the synthesis budget) and played out.
    SynthesisFinished { truncated: bool },
    SynthesisFailed(SynthesisError),
    TransportClosed,
}

pub(crate) enum Stage {
    None,
    Transcribing(ProviderCall<String, TranscriptionError>),
    Generating(ProviderCall<String, GenerationError>),
    Speaking(Playback),
}

impl Stage {
    pub(crate) fn is_idle(&self) -> bool {
        matches!(self, Stage::None)
    }

    /// Time since the current stage started.
    pub(crate) fn elapsed(&self) -> Duration {
        match self {
            Stage::None => Duration::ZERO,
            Stage::Transcribing(call) => call.elapsed(),
            Stage::Generating(call) => call.elapsed(),
            Stage::Speaking(playback) => playback.elapsed(),
        }
    }

    /// Drop whatever is running. Buffered reply frames go with the playback;
    /// nothing further reaches the transport.
    pub(crate) fn cancel(&mut self) {
        *self = Stage::None;
    }

    pub(crate) async fn advance(&mut self) -> StageEvent {
        match self {
            Stage::None => future::pending().await,
            Stage::Transcribing(call) => {
                let timeout = call.timeout;
                match call.wait().await {
                    Ok(result) => StageEvent::Transcribed(result),
                    Err(CallFailure::TimedOut) => {
                        StageEvent::Transcribed(Err(TranscriptionError::Timeout(timeout)))
                    }
                    Err(CallFailure::Panicked(msg)) => {
                        StageEvent::Transcribed(Err(TranscriptionError::Provider(msg)))
                    }
                }
            }
            Stage::Generating(call) => {
                let timeout = call.timeout;
                match call.wait().await {
                    Ok(result) => StageEvent::Generated(result),
                    Err(CallFailure::TimedOut) => {
                        StageEvent::Generated(Err(GenerationError::Timeout(timeout)))
                    }
                    Err(CallFailure::Panicked(msg)) => {
                        StageEvent::Generated(Err(GenerationError::Unavailable(msg)))
                    }
                }
            }
            Stage::Speaking(playback) => playback.advance().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Blocking provider calls
// ---------------------------------------------------------------------------

pub(crate) enum CallFailure {
    TimedOut,
    Panicked(String),
}

/// A provider call running on the blocking pool, bounded by a deadline.
pub(crate) struct ProviderCall<T, E> {
    handle: JoinHandle<Result<T, E>>,
    cancel: CancelFlag,
    deadline: Instant,
    timeout: Duration,
    started: Instant,
}

impl<T, E> ProviderCall<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn spawn<F>(timeout: Duration, cancel: CancelFlag, call: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let started = Instant::now();
        Self {
            handle: tokio::task::spawn_blocking(call),
            cancel,
            deadline: started + timeout,
            timeout,
            started,
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    async fn wait(&mut self) -> Result<Result<T, E>, CallFailure> {
        match time::timeout_at(self.deadline, &mut self.handle).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(join_err)) => Err(CallFailure::Panicked(format!(
                "provider task failed: {join_err}"
            ))),
            Err(_) => {
                // The blocking thread cannot be stopped; a cooperative
                // provider sees the flag, any other result is dropped.
                self.cancel.cancel();
                Err(CallFailure::TimedOut)
            }
        }
    }
}

impl<T, E> Drop for ProviderCall<T, E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

enum Produced {
    Frame(AudioFrame),
    Failed(SynthesisError),
    /// The synthesis budget ran out; no more frames follow.
    Truncated,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PlaybackOptions {
    pub pacing: PlaybackPacing,
    pub first_frame_timeout: Duration,
    pub synthesis_timeout: Duration,
}

/// Reply audio flowing from a synthesis producer to the transport.
pub(crate) struct Playback {
    frames: mpsc::Receiver<Produced>,
    output: mpsc::Sender<AudioFrame>,
    cancel: CancelFlag,
    pacing: PlaybackPacing,
    first_frame_deadline: Instant,
    first_frame_timeout: Duration,
    /// Received from the producer, waiting for its release slot.
    pending: Option<AudioFrame>,
    /// Realtime pacing: when the last delivered frame finishes playing.
    next_release: Option<Instant>,
    delivered: usize,
    truncated: bool,
    started: Instant,
}

impl Playback {
    /// Start synthesizing `text` on the blocking pool.
    pub(crate) fn spawn(
        tts: Arc<dyn TextToSpeech>,
        text: String,
        language: Language,
        output: mpsc::Sender<AudioFrame>,
        options: PlaybackOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SYNTH_AHEAD_FRAMES);
        let cancel = CancelFlag::new();
        let producer_cancel = cancel.clone();
        let budget = options.synthesis_timeout;

        tokio::task::spawn_blocking(move || {
            let stream = match tts.synthesize(&text, language) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.blocking_send(Produced::Failed(e));
                    return;
                }
            };
            let deadline = std::time::Instant::now() + budget;
            let mut produced = 0usize;
            for item in stream {
                if producer_cancel.is_cancelled() {
                    debug!(produced, "synthesis cancelled");
                    return;
                }
                if std::time::Instant::now() >= deadline {
                    warn!(
                        produced,
                        budget_ms = budget.as_millis() as u64,
                        "synthesis did not complete within budget; reply truncated"
                    );
                    let _ = tx.blocking_send(Produced::Truncated);
                    return;
                }
                let message = match item {
                    Ok(frame) => Produced::Frame(frame),
                    Err(e) => {
                        let _ = tx.blocking_send(Produced::Failed(e));
                        return;
                    }
                };
                // Receiver gone: playback was cancelled or the session ended.
                if tx.blocking_send(message).is_err() {
                    return;
                }
                produced += 1;
            }
            debug!(produced, "synthesis complete");
        });

        Self::from_channel(rx, output, cancel, options)
    }

    /// Play frames that are already rendered (the fallback tone).
    pub(crate) fn prerendered(
        frames: Vec<AudioFrame>,
        output: mpsc::Sender<AudioFrame>,
        options: PlaybackOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(frames.len().max(1));
        for frame in frames {
            let _ = tx.try_send(Produced::Frame(frame));
        }
        Self::from_channel(rx, output, CancelFlag::new(), options)
    }

    fn from_channel(
        frames: mpsc::Receiver<Produced>,
        output: mpsc::Sender<AudioFrame>,
        cancel: CancelFlag,
        options: PlaybackOptions,
    ) -> Self {
        let started = Instant::now();
        Self {
            frames,
            output,
            cancel,
            pacing: options.pacing,
            first_frame_deadline: started + options.first_frame_timeout,
            first_frame_timeout: options.first_frame_timeout,
            pending: None,
            next_release: None,
            delivered: 0,
            truncated: false,
            started,
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    async fn advance(&mut self) -> StageEvent {
        loop {
            if self.pending.is_none() {
                let message = if self.delivered == 0 {
                    match time::timeout_at(self.first_frame_deadline, self.frames.recv()).await {
                        Ok(message) => message,
                        Err(_) => {
                            self.cancel.cancel();
                            return StageEvent::SynthesisFailed(SynthesisError::Timeout(
                                self.first_frame_timeout,
                            ));
                        }
                    }
                } else {
                    self.frames.recv().await
                };

                match message {
                    Some(Produced::Frame(frame)) => self.pending = Some(frame),
                    Some(Produced::Truncated) => self.truncated = true,
                    Some(Produced::Failed(e)) => return StageEvent::SynthesisFailed(e),
                    None if self.delivered == 0 && !self.truncated => {
                        return StageEvent::SynthesisFailed(SynthesisError::Provider(
                            "synthesis produced no audio".into(),
                        ));
                    }
                    None => {
                        // Let the last frame play out before the turn ends.
                        if let Some(at) = self.next_release {
                            time::sleep_until(at).await;
                        }
                        return StageEvent::SynthesisFinished {
                            truncated: self.truncated,
                        };
                    }
                }
                continue;
            }

            if let Some(at) = self.next_release {
                time::sleep_until(at).await;
            }
            let permit = match self.output.reserve().await {
                Ok(permit) => permit,
                Err(_) => return StageEvent::TransportClosed,
            };
            let Some(frame) = self.pending.take() else {
                continue;
            };
            let length = frame.duration();
            permit.send(frame);
            self.delivered += 1;

            if self.pacing == PlaybackPacing::Realtime {
                let now = Instant::now();
                let base = self.next_release.map_or(now, |at| at.max(now));
                self.next_release = Some(base + length);
            }
            return StageEvent::Delivered {
                first: self.delivered == 1,
            };
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
