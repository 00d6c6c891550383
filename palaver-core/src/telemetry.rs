//! Append-only telemetry: one record per turn outcome or error, plus a
//! process-wide startup/shutdown log.
//!
//! Sinks never fail a session. Write errors are logged and swallowed.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::language::Language;
use crate::session::TurnPhase;

/// File name of the process-wide log inside the telemetry directory.
pub const PROCESS_LOG_FILE: &str = "palaver_process.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Completed,
    NoSpeech,
    Interrupted,
    /// Playback stopped at the total synthesis budget.
    Truncated,
    Failed,
    /// A malformed input frame was discarded.
    FrameRejected,
}

/// Per-turn counters and stage latencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetrics {
    pub utterance_ms: u64,
    pub utterance_frames: usize,
    pub transcription_ms: Option<u64>,
    pub generation_ms: Option<u64>,
    pub first_frame_ms: Option<u64>,
    pub frames_delivered: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    /// Turn number, 0 when the record is not tied to a turn.
    pub turn: u64,
    pub phase: TurnPhase,
    pub outcome: RecordOutcome,
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TurnMetrics>,
}

impl TelemetryRecord {
    pub fn new(
        session_id: impl Into<String>,
        turn: u64,
        phase: TurnPhase,
        outcome: RecordOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            turn,
            phase,
            outcome,
            detail: None,
            metrics: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_metrics(mut self, metrics: TurnMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessEvent {
    Startup,
    EngineAvailable,
    EngineUnavailable,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub timestamp: DateTime<Utc>,
    pub event: ProcessEvent,
    pub detail: Option<String>,
}

impl ProcessRecord {
    pub fn new(event: ProcessEvent, detail: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            detail,
        }
    }
}

pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, record: TelemetryRecord);

    fn record_process(&self, _record: ProcessRecord) {}
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&self, _record: TelemetryRecord) {}
}

/// Keeps records in memory. Used by hosts that inspect outcomes and by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TelemetryRecord>>,
    process: Mutex<Vec<ProcessRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().clone()
    }

    pub fn process_records(&self) -> Vec<ProcessRecord> {
        self.process.lock().clone()
    }

    pub fn count(&self, outcome: RecordOutcome) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, record: TelemetryRecord) {
        self.records.lock().push(record);
    }

    fn record_process(&self, record: ProcessRecord) {
        self.process.lock().push(record);
    }
}

/// JSON-lines files: session records go to the language's log file, process
/// records to [`PROCESS_LOG_FILE`]. Both are opened in append mode.
pub struct JsonlSink {
    session_path: PathBuf,
    session_log: Mutex<BufWriter<File>>,
    process_log: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn open(dir: &Path, language: Language) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let session_path = dir.join(language.log_file_name());
        let session_log = append(&session_path)?;
        let process_log = append(&dir.join(PROCESS_LOG_FILE))?;
        Ok(Self {
            session_path,
            session_log: Mutex::new(BufWriter::new(session_log)),
            process_log: Mutex::new(BufWriter::new(process_log)),
        })
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }
}

impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink")
            .field("session_path", &self.session_path)
            .finish_non_exhaustive()
    }
}

fn append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn write_line<T: Serialize>(writer: &Mutex<BufWriter<File>>, value: &T) {
    let mut w = writer.lock();
    let result = serde_json::to_writer(&mut *w, value)
        .map_err(std::io::Error::from)
        .and_then(|_| w.write_all(b"\n"))
        .and_then(|_| w.flush());
    if let Err(e) = result {
        warn!(error = %e, "telemetry write failed");
    }
}

impl TelemetrySink for JsonlSink {
    fn record(&self, record: TelemetryRecord) {
        write_line(&self.session_log, &record);
    }

    fn record_process(&self, record: ProcessRecord) {
        write_line(&self.process_log, &record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "palaver-telemetry-{tag}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn memory_sink_counts_outcomes() {
        let sink = MemorySink::new();
        sink.record(TelemetryRecord::new("s", 1, TurnPhase::Generating, RecordOutcome::Failed));
        sink.record(TelemetryRecord::new("s", 2, TurnPhase::Playing, RecordOutcome::Completed));
        sink.record(TelemetryRecord::new("s", 3, TurnPhase::Idle, RecordOutcome::Failed));
        assert_eq!(sink.count(RecordOutcome::Failed), 2);
        assert_eq!(sink.count(RecordOutcome::Completed), 1);
        assert_eq!(sink.records()[1].turn, 2);
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_record() {
        let dir = temp_dir("jsonl");
        let sink = JsonlSink::open(&dir, Language::Spanish).expect("open sink");
        assert!(sink.session_path().ends_with("voice_agent_spanish.log"));

        sink.record(
            TelemetryRecord::new("conn-7", 1, TurnPhase::Transcribing, RecordOutcome::Failed)
                .with_detail("stt down"),
        );
        sink.record(
            TelemetryRecord::new("conn-7", 2, TurnPhase::Playing, RecordOutcome::Completed)
                .with_metrics(TurnMetrics {
                    frames_delivered: 5,
                    ..TurnMetrics::default()
                }),
        );
        sink.record_process(ProcessRecord::new(ProcessEvent::Startup, None));

        let text = std::fs::read_to_string(sink.session_path()).expect("read log");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["sessionId"], "conn-7");
        assert_eq!(lines[0]["outcome"], "failed");
        assert_eq!(lines[0]["detail"], "stt down");
        assert!(lines[0].get("metrics").is_none());
        assert_eq!(lines[1]["metrics"]["framesDelivered"], 5);

        let process = std::fs::read_to_string(dir.join(PROCESS_LOG_FILE)).expect("read process log");
        assert!(process.contains(r#""event":"startup""#));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
