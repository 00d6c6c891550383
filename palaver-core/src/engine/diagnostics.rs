use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Lock-free counters updated by a session's orchestrator and readable from
/// any thread while it runs.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_rejected: AtomicUsize,
    pub speech_onsets: AtomicUsize,
    pub utterances: AtomicUsize,
    pub transcriptions: AtomicUsize,
    pub generations: AtomicUsize,
    pub frames_out: AtomicUsize,
    pub barge_ins: AtomicUsize,
    pub provider_errors: AtomicUsize,
}

impl SessionDiagnostics {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            speech_onsets: self.speech_onsets.load(Ordering::Relaxed),
            utterances: self.utterances.load(Ordering::Relaxed),
            transcriptions: self.transcriptions.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            barge_ins: self.barge_ins.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_rejected: usize,
    pub speech_onsets: usize,
    pub utterances: usize,
    pub transcriptions: usize,
    pub generations: usize,
    pub frames_out: usize,
    pub barge_ins: usize,
    pub provider_errors: usize,
}
