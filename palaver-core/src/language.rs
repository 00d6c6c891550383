//! Conversation languages and their per-language resources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A language a session can be held in.
///
/// The language selects the locale handed to the speech providers, the
/// system prompt that frames every generation request, and the telemetry
/// log file the session's records land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Spanish,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Spanish];

    /// Locale code understood by the speech providers.
    pub fn locale(self) -> &'static str {
        match self {
            Language::English => "en-us",
            Language::Spanish => "es-es",
        }
    }

    /// Lowercase name, as used on the command line and in settings.
    pub fn name(self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Spanish => "spanish",
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            Language::English => {
                "You are a helpful assistant in a voice conversation. Keep your responses \
                 concise and suitable for text-to-speech."
            }
            Language::Spanish => {
                "Eres un asistente útil en una conversación por voz. Mantén tus respuestas \
                 concisas y adecuadas para texto-a-voz. Responde siempre en español. Eres \
                 amable y servicial."
            }
        }
    }

    /// File name of the append-only telemetry log for this language.
    pub fn log_file_name(self) -> &'static str {
        match self {
            Language::English => "voice_agent.log",
            Language::Spanish => "voice_agent_spanish.log",
        }
    }

    /// Parse a user-supplied language, falling back to English for anything
    /// unrecognised.
    pub fn parse_or_default(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            tracing::warn!(language = raw, "language not supported, defaulting to English");
            Language::English
        })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLanguage(pub String);

impl fmt::Display for UnknownLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported language '{}'", self.0)
    }
}

impl std::error::Error for UnknownLanguage {}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "eng" | "en-us" | "english" => Ok(Language::English),
            "es" | "spa" | "es-es" | "spanish" | "español" | "espanol" => Ok(Language::Spanish),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_locale_codes() {
        assert_eq!("English".parse::<Language>(), Ok(Language::English));
        assert_eq!(" es-es ".parse::<Language>(), Ok(Language::Spanish));
        assert_eq!("spa".parse::<Language>(), Ok(Language::Spanish));
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert!("klingon".parse::<Language>().is_err());
        assert_eq!(Language::parse_or_default("klingon"), Language::English);
    }

    #[test]
    fn each_language_has_its_own_log_file() {
        assert_ne!(
            Language::English.log_file_name(),
            Language::Spanish.log_file_name()
        );
        assert!(Language::Spanish.system_prompt().contains("español"));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Language::Spanish).expect("serialize language");
        assert_eq!(json, r#""spanish""#);
    }
}
