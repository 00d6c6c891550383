//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use palaver_core::{BargeInMode, ConversationConfig, Language, PlaybackPacing, SynthesisFallback};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OLLAMA_HOST: &str = "localhost:11434";
pub const DEFAULT_MODEL: &str = "granite3-dense:latest";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub language: String,
    pub ollama_host: String,
    pub model: String,
    pub max_reply_tokens: u32,
    pub context_window: usize,
    pub speech_threshold: f32,
    pub min_speech_ms: u32,
    pub trailing_silence_ms: u32,
    pub max_utterance_ms: u32,
    pub generation_timeout_secs: u64,
    pub barge_in: BargeInMode,
    pub pacing: PlaybackPacing,
    pub synthesis_fallback: SynthesisFallback,
    /// Where telemetry logs go. `None` means the settings directory.
    pub telemetry_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            language: "english".into(),
            ollama_host: DEFAULT_OLLAMA_HOST.into(),
            model: DEFAULT_MODEL.into(),
            max_reply_tokens: 200,
            context_window: 20,
            speech_threshold: 0.02,
            min_speech_ms: 60,
            trailing_silence_ms: 600,
            max_utterance_ms: 30_000,
            generation_timeout_secs: 60,
            barge_in: BargeInMode::default(),
            pacing: PlaybackPacing::default(),
            synthesis_fallback: SynthesisFallback::default(),
            telemetry_dir: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.language = normalize_language(&self.language);
        self.ollama_host = non_empty_or(&self.ollama_host, DEFAULT_OLLAMA_HOST);
        self.model = non_empty_or(&self.model, DEFAULT_MODEL);
        self.max_reply_tokens = self.max_reply_tokens.clamp(16, 4096);
        self.context_window = self.context_window.clamp(1, 200);
        self.speech_threshold = if self.speech_threshold.is_finite() {
            self.speech_threshold.clamp(0.001, 0.5)
        } else {
            0.02
        };
        self.min_speech_ms = self.min_speech_ms.clamp(20, 1_000);
        self.trailing_silence_ms = self.trailing_silence_ms.clamp(100, 5_000);
        self.max_utterance_ms = self.max_utterance_ms.clamp(1_000, 120_000);
        self.generation_timeout_secs = self.generation_timeout_secs.clamp(1, 600);
        self.telemetry_dir = self
            .telemetry_dir
            .take()
            .filter(|dir| !dir.as_os_str().is_empty());
    }

    /// `OLLAMA_HOST` / `OLLAMA_MODEL` win over the settings file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("OLLAMA_HOST").ok(),
            std::env::var("OLLAMA_MODEL").ok(),
        );
    }

    pub fn apply_overrides(&mut self, host: Option<String>, model: Option<String>) {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.ollama_host = host.trim().to_string();
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.model = model.trim().to_string();
        }
    }

    pub fn language(&self) -> Language {
        Language::parse_or_default(&self.language)
    }

    pub fn conversation_config(&self) -> ConversationConfig {
        let mut config = ConversationConfig {
            model_id: self.model.clone(),
            language: self.language(),
            context_window: self.context_window,
            max_reply_tokens: Some(self.max_reply_tokens),
            generation_timeout_ms: self.generation_timeout_secs * 1000,
            barge_in: self.barge_in,
            pacing: self.pacing,
            synthesis_fallback: self.synthesis_fallback,
            ..ConversationConfig::default()
        };
        config.buffer.speech_threshold = self.speech_threshold;
        config.buffer.min_speech_ms = self.min_speech_ms;
        config.buffer.trailing_silence_ms = self.trailing_silence_ms;
        config.buffer.max_utterance_ms = self.max_utterance_ms.max(self.min_speech_ms + 1);
        config
    }

    pub fn telemetry_dir(&self, settings_path: &Path) -> PathBuf {
        self.telemetry_dir.clone().unwrap_or_else(|| {
            settings_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

fn non_empty_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

/// Canonical language name; anything unsupported becomes English.
pub fn normalize_language(raw: &str) -> String {
    Language::parse_or_default(raw).name().into()
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Palaver")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("palaver")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_config() {
        let settings = AppSettings::default();
        let config = settings.conversation_config();
        config.validate().expect("default settings should validate");
        assert_eq!(config.model_id, DEFAULT_MODEL);
        assert_eq!(config.max_reply_tokens, Some(200));
        assert_eq!(config.generation_timeout_ms, 60_000);
    }

    #[test]
    fn normalize_clamps_and_canonicalizes() {
        let mut settings = AppSettings {
            language: "ES".into(),
            model: "   ".into(),
            context_window: 0,
            speech_threshold: f32::NAN,
            trailing_silence_ms: 5,
            telemetry_dir: Some(PathBuf::new()),
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.language, "spanish");
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.context_window, 1);
        assert_eq!(settings.speech_threshold, 0.02);
        assert_eq!(settings.trailing_silence_ms, 100);
        assert!(settings.telemetry_dir.is_none());
    }

    #[test]
    fn unknown_language_becomes_english() {
        assert_eq!(normalize_language("klingon"), "english");
    }

    #[test]
    fn overrides_replace_host_and_model() {
        let mut settings = AppSettings::default();
        settings.apply_overrides(Some("gpu-box:11434".into()), Some(" ".into()));
        assert_eq!(settings.ollama_host, "gpu-box:11434");
        assert_eq!(settings.model, DEFAULT_MODEL);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("palaver-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let mut settings = AppSettings::default();
        settings.barge_in = BargeInMode::Playback;
        settings.context_window = 8;
        save_settings(&path, &settings).expect("save settings");

        let loaded = load_settings(&path);
        assert_eq!(loaded.barge_in, BargeInMode::Playback);
        assert_eq!(loaded.context_window, 8);
        assert_eq!(settings.telemetry_dir(&path), dir);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let loaded = load_settings(Path::new("/nonexistent/palaver/settings.json"));
        assert_eq!(loaded.ollama_host, DEFAULT_OLLAMA_HOST);
    }
}
