//! Palaver command-line host.
//!
//! Runs one voice conversation over a WAV recording: the file is streamed
//! into a session as 20 ms frames, replies come from an Ollama model (or the
//! offline echo model), and the synthesized reply audio is written to a WAV
//! file.
//!
//! ## Runtime note
//!
//! The runtime is built by hand rather than with `#[tokio::main]` so the
//! process telemetry record for shutdown is written after every session task
//! has been joined.

mod availability;
mod settings;
mod wav_transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use palaver_core::providers::stub::{EchoModel, StubTranscriber, ToneSynthesizer};
use palaver_core::telemetry::{ProcessEvent, ProcessRecord};
use palaver_core::{
    JsonlSink, Language, LanguageModel, OllamaChat, Providers, SessionEvent, SessionManager,
    TelemetrySink,
};
use settings::{default_settings_path, load_settings, save_settings};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "palaver", version, about = "Turn-based voice conversation over WAV files")]
struct Args {
    /// Recording of the caller's side of the conversation.
    #[arg(short, long)]
    input: PathBuf,

    /// Where the assistant's reply audio is written.
    #[arg(short, long, default_value = "reply.wav")]
    output: PathBuf,

    /// Conversation language (english, spanish).
    #[arg(short, long)]
    language: Option<String>,

    /// Settings file. Defaults to the per-user data directory.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Ollama host, e.g. localhost:11434.
    #[arg(long)]
    host: Option<String>,

    /// Ollama model name.
    #[arg(long)]
    model: Option<String>,

    /// Directory for telemetry logs.
    #[arg(long)]
    telemetry_dir: Option<PathBuf>,

    /// Stream the recording as fast as the session accepts it instead of at
    /// speaking pace.
    #[arg(long)]
    fast: bool,

    /// Answer with the built-in echo model instead of contacting Ollama.
    #[arg(long)]
    offline: bool,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_settings: bool,
}

fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("palaver=info")),
        )
        .init();

    let args = Args::parse();

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    settings.apply_overrides(args.host.clone(), args.model.clone());
    if let Some(language) = args.language.as_deref() {
        settings.language = settings::normalize_language(language);
    }
    if let Some(dir) = args.telemetry_dir.clone() {
        settings.telemetry_dir = Some(dir);
    }
    settings.normalize();
    if args.save_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("saving {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }

    let language = settings.language();
    let config = settings.conversation_config();
    let telemetry_dir = settings.telemetry_dir(&settings_path);
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(
        JsonlSink::open(&telemetry_dir, language)
            .with_context(|| format!("opening telemetry in {}", telemetry_dir.display()))?,
    );
    telemetry.record_process(ProcessRecord::new(
        ProcessEvent::Startup,
        Some(format!("language={language} model={}", config.model_id)),
    ));

    // ── Providers ─────────────────────────────────────────────────────────
    let llm: Arc<dyn LanguageModel> = if args.offline {
        info!("offline mode, replies come from the echo model");
        Arc::new(EchoModel)
    } else {
        let chat = OllamaChat::new(&settings.ollama_host, config.generation_timeout())?;
        info!(url = chat.base_url(), model = %config.model_id, "using Ollama");
        Arc::new(chat)
    };
    let providers = Providers {
        stt: Arc::new(StubTranscriber),
        llm,
        tts: Arc::new(ToneSynthesizer::default()),
    };
    let sample_rate = config.buffer.sample_rate;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("palaver")
        .build()
        .context("building tokio runtime")?;

    let engine_llm = Arc::clone(&providers.llm);
    let manager = SessionManager::new(config, providers, Arc::clone(&telemetry))?;
    let outcome = runtime.block_on(run_conversation(
        &args,
        language,
        sample_rate,
        manager,
        engine_llm,
        Arc::clone(&telemetry),
    ));

    telemetry.record_process(ProcessRecord::new(
        ProcessEvent::Shutdown,
        outcome.as_ref().err().map(|e| format!("{e:#}")),
    ));
    outcome
}

async fn run_conversation(
    args: &Args,
    language: Language,
    sample_rate: u32,
    manager: SessionManager,
    llm: Arc<dyn LanguageModel>,
    telemetry: Arc<dyn TelemetrySink>,
) -> Result<()> {
    if !args.offline {
        availability::wait_for_engine(
            llm,
            telemetry.as_ref(),
            availability::CHECK_ATTEMPTS,
            availability::CHECK_INTERVAL,
        )
        .await;
    }

    let samples = wav_transport::read_wav(&args.input, sample_rate)?;
    let tail = manager.config().buffer.trailing_silence() + Duration::from_millis(100);

    let handle = manager.open("wav", language)?;
    let transcript = tokio::spawn(log_transcript(handle.events));
    let collector = tokio::spawn(wav_transport::collect_replies(handle.frames_out));
    let frames_in = handle.frames_in;
    wav_transport::send_recording(&samples, sample_rate, tail, !args.fast, &frames_in).await?;
    drop(frames_in);

    let session = manager.wait("wav").await;
    if let Err(e) = &session {
        warn!(error = %e, "session ended with error");
    }
    let (reply_rate, reply) = collector.await.context("collecting reply audio")?;
    wav_transport::write_wav(&args.output, reply_rate, &reply)?;
    let turns = transcript.await.context("logging transcript")?;
    info!(turns, "conversation finished");

    session.map_err(Into::into)
}

/// Log transcript lines and turn outcomes as they happen. Returns the number
/// of finished turns once the session's event stream closes.
async fn log_transcript(mut events: broadcast::Receiver<SessionEvent>) -> u64 {
    let mut turns = 0;
    loop {
        match events.recv().await {
            Ok(SessionEvent::TranscriptAppended { speaker, text }) => {
                info!(speaker = ?speaker, "{text}");
            }
            Ok(SessionEvent::TurnFinished { turn, outcome }) => {
                turns += 1;
                info!(turn, outcome = ?outcome, "turn finished");
            }
            Ok(SessionEvent::PhaseChanged { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "transcript log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return turns,
        }
    }
}
