//! Connection id → running session.
//!
//! ## Lifecycle
//!
//! ```text
//! SessionManager::open(id, language)
//!     └─► Session created (Idle, empty transcript), orchestrator task spawned
//!         └─► SessionHandle returned to the transport
//!             └─► close(id)        → shutdown signalled, task awaited, state dropped
//!                 or input dropped → task drains pending turns and exits
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    audio::AudioFrame,
    config::ConversationConfig,
    engine::{DiagnosticsSnapshot, Orchestrator, SessionDiagnostics},
    error::{PalaverError, Result},
    events::SessionEvent,
    language::Language,
    providers::Providers,
    session::{Session, SharedSession, Transcript, TurnPhase},
    telemetry::TelemetrySink,
};

/// Broadcast capacity: session events buffered for slow subscribers.
const EVENT_CAP: usize = 256;

/// Transport-side ends of a session.
///
/// Dropping `frames_in` signals end of input; the session finishes any
/// captured turn and then closes `frames_out`.
#[derive(Debug)]
pub struct SessionHandle {
    pub connection_id: String,
    pub frames_in: mpsc::Sender<AudioFrame>,
    pub frames_out: mpsc::Receiver<AudioFrame>,
    pub events: broadcast::Receiver<SessionEvent>,
}

struct SessionSlot {
    state: SharedSession,
    events: broadcast::Sender<SessionEvent>,
    diagnostics: Arc<SessionDiagnostics>,
    shutdown: oneshot::Sender<()>,
    /// Taken by `wait` while it awaits the task.
    task: Option<JoinHandle<Result<()>>>,
}

/// Owns every live session. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct SessionManager {
    config: Arc<ConversationConfig>,
    providers: Providers,
    telemetry: Arc<dyn TelemetrySink>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionManager {
    pub fn new(
        config: ConversationConfig,
        providers: Providers,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            providers,
            telemetry,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Create a session and spawn its orchestrator on the current runtime.
    ///
    /// # Errors
    /// `PalaverError::SessionExists` if `connection_id` is already open.
    pub fn open(&self, connection_id: &str, language: Language) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock();
        if let Some(slot) = sessions.get(connection_id) {
            if slot.task.as_ref().map_or(true, |task| !task.is_finished()) {
                return Err(PalaverError::SessionExists(connection_id.to_string()));
            }
            // The previous connection already ended on its own.
            sessions.remove(connection_id);
        }

        let state: SharedSession = Arc::new(Mutex::new(Session::new(
            connection_id,
            language,
            self.config.model_id.clone(),
        )));
        let (in_tx, in_rx) = mpsc::channel(self.config.input_queue_frames);
        let (out_tx, out_rx) = mpsc::channel(self.config.output_queue_frames);
        let (event_tx, event_rx) = broadcast::channel(EVENT_CAP);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let orchestrator = Orchestrator::new(
            Arc::clone(&state),
            Arc::clone(&self.config),
            self.providers.clone(),
            Arc::clone(&self.telemetry),
            event_tx.clone(),
            out_tx,
        );
        let diagnostics = orchestrator.diagnostics();
        let span = info_span!("session", id = %connection_id, language = %language);
        let task = tokio::spawn(orchestrator.run(in_rx, shutdown_rx).instrument(span));

        sessions.insert(
            connection_id.to_string(),
            SessionSlot {
                state,
                events: event_tx,
                diagnostics,
                shutdown: shutdown_tx,
                task: Some(task),
            },
        );
        info!(connection_id, %language, open = sessions.len(), "session opened");

        Ok(SessionHandle {
            connection_id: connection_id.to_string(),
            frames_in: in_tx,
            frames_out: out_rx,
            events: event_rx,
        })
    }

    /// Stop a session and discard its state. In-flight provider results are
    /// dropped when they arrive.
    ///
    /// # Errors
    /// `SessionNotFound` for an unknown id, or the session's own fatal error
    /// (`TransportClosed`) if it ended with one.
    pub async fn close(&self, connection_id: &str) -> Result<()> {
        let slot = self
            .sessions
            .lock()
            .remove(connection_id)
            .ok_or_else(|| PalaverError::SessionNotFound(connection_id.to_string()))?;
        let _ = slot.shutdown.send(());
        let outcome = match slot.task {
            Some(task) => join(task).await,
            None => Ok(()),
        };
        info!(connection_id, "session closed");
        outcome
    }

    /// Wait for a session to end by itself (input dropped and drained), then
    /// discard it.
    pub async fn wait(&self, connection_id: &str) -> Result<()> {
        let task = {
            let mut sessions = self.sessions.lock();
            let slot = sessions
                .get_mut(connection_id)
                .ok_or_else(|| PalaverError::SessionNotFound(connection_id.to_string()))?;
            slot.task.take()
        };
        let outcome = match task {
            Some(task) => join(task).await,
            None => Ok(()),
        };
        self.sessions.lock().remove(connection_id);
        outcome
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, SessionSlot)> = self.sessions.lock().drain().collect();
        for (id, slot) in slots {
            let _ = slot.shutdown.send(());
            let Some(task) = slot.task else {
                continue;
            };
            if let Err(e) = join(task).await {
                warn!(connection_id = %id, error = %e, "session ended with error");
            }
        }
    }

    pub fn phase(&self, connection_id: &str) -> Option<TurnPhase> {
        self.sessions
            .lock()
            .get(connection_id)
            .map(|slot| slot.state.lock().phase)
    }

    /// Snapshot of the session's transcript.
    pub fn transcript(&self, connection_id: &str) -> Option<Transcript> {
        self.sessions
            .lock()
            .get(connection_id)
            .map(|slot| slot.state.lock().transcript.clone())
    }

    pub fn diagnostics(&self, connection_id: &str) -> Option<DiagnosticsSnapshot> {
        self.sessions
            .lock()
            .get(connection_id)
            .map(|slot| slot.diagnostics.snapshot())
    }

    /// Another subscription to a session's events.
    pub fn subscribe(&self, connection_id: &str) -> Option<broadcast::Receiver<SessionEvent>> {
        self.sessions
            .lock()
            .get(connection_id)
            .map(|slot| slot.events.subscribe())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(PalaverError::Other(anyhow::anyhow!("session task failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::stub::{EchoModel, StubTranscriber, ToneSynthesizer};
    use crate::telemetry::NullSink;

    fn manager() -> SessionManager {
        SessionManager::new(
            ConversationConfig::default(),
            Providers::new(StubTranscriber, EchoModel, ToneSynthesizer::default()),
            Arc::new(NullSink),
        )
        .expect("valid config")
    }

    #[tokio::test]
    async fn open_twice_is_rejected() {
        let manager = manager();
        let _handle = manager.open("conn-1", Language::English).expect("first open");
        assert!(matches!(
            manager.open("conn-1", Language::English),
            Err(PalaverError::SessionExists(_))
        ));
        assert_eq!(manager.len(), 1);
        manager.close("conn-1").await.expect("close");
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn new_session_is_idle_and_empty() {
        let manager = manager();
        let _handle = manager.open("conn-2", Language::Spanish).expect("open");
        assert_eq!(manager.phase("conn-2"), Some(TurnPhase::Idle));
        assert!(manager.transcript("conn-2").map_or(false, |t| t.is_empty()));
        assert_eq!(manager.phase("missing"), None);
        manager.shutdown().await;
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn closing_unknown_session_errors() {
        let manager = manager();
        assert!(matches!(
            manager.close("nope").await,
            Err(PalaverError::SessionNotFound(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ConversationConfig {
            context_window: 0,
            ..ConversationConfig::default()
        };
        assert!(SessionManager::new(
            config,
            Providers::new(StubTranscriber, EchoModel, ToneSynthesizer::default()),
            Arc::new(NullSink),
        )
        .is_err());
    }
}
