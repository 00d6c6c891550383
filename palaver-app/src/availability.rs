//! Language-model availability check run once at startup.

use std::sync::Arc;
use std::time::Duration;

use palaver_core::telemetry::{ProcessEvent, ProcessRecord};
use palaver_core::{LanguageModel, TelemetrySink};
use tracing::{error, info, warn};

pub const CHECK_ATTEMPTS: u32 = 5;
pub const CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Ask the engine for its models until it answers or the attempts run out.
///
/// Never fails startup: on exhaustion it logs an error and returns `false`,
/// and sessions surface `Unavailable` per turn instead.
pub async fn wait_for_engine(
    llm: Arc<dyn LanguageModel>,
    telemetry: &dyn TelemetrySink,
    attempts: u32,
    interval: Duration,
) -> bool {
    for attempt in 1..=attempts {
        let llm = Arc::clone(&llm);
        let outcome = tokio::task::spawn_blocking(move || llm.list_models()).await;
        match outcome {
            Ok(Ok(models)) => {
                info!(attempt, models = models.len(), "language model engine available");
                telemetry.record_process(ProcessRecord::new(
                    ProcessEvent::EngineAvailable,
                    Some(models.join(", ")),
                ));
                return true;
            }
            Ok(Err(e)) => warn!(attempt, attempts, error = %e, "language model engine not ready"),
            Err(e) => warn!(attempt, attempts, error = %e, "engine availability check panicked"),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    error!(attempts, "language model engine unreachable, continuing without it");
    telemetry.record_process(ProcessRecord::new(
        ProcessEvent::EngineUnavailable,
        Some(format!("no answer after {attempts} attempts")),
    ));
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use palaver_core::{CancelFlag, GenerationError, GenerationRequest, MemorySink};

    use super::*;

    /// Fails `failures` times, then lists one model.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl LanguageModel for Flaky {
        fn generate(
            &self,
            _request: &GenerationRequest,
            _cancel: &CancelFlag,
        ) -> Result<String, GenerationError> {
            Ok(String::new())
        }

        fn list_models(&self) -> Result<Vec<String>, GenerationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(GenerationError::Unavailable("connection refused".into()))
            } else {
                Ok(vec!["granite3-dense:latest".into()])
            }
        }
    }

    #[tokio::test]
    async fn succeeds_after_retries() {
        let llm = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let sink = MemorySink::new();
        let up = wait_for_engine(llm.clone(), &sink, 5, Duration::from_millis(1)).await;
        assert!(up);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
        let records = sink.process_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, ProcessEvent::EngineAvailable);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let llm = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let sink = MemorySink::new();
        let up = wait_for_engine(llm.clone(), &sink, 3, Duration::from_millis(1)).await;
        assert!(!up);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.process_records()[0].event, ProcessEvent::EngineUnavailable);
    }
}
