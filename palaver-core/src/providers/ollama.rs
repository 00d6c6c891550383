//! Ollama chat adapter (`POST /api/chat`, `GET /api/tags`).
//!
//! Uses the blocking reqwest client: calls already run on the blocking pool,
//! so there is nothing to gain from an async client here.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::providers::{CancelFlag, ChatMessage, GenerationRequest, LanguageModel};

pub const DEFAULT_HOST: &str = "localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaChat {
    /// `host` may be `host:port` or a full URL; a scheme is added if absent.
    pub fn new(host: &str, timeout: Duration) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url(host),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_transport_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.timeout)
        } else if e.is_decode() {
            GenerationError::MalformedResponse(e.to_string())
        } else {
            GenerationError::Unavailable(e.to_string())
        }
    }
}

fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

fn chat_body(request: &GenerationRequest) -> ChatBody<'_> {
    ChatBody {
        model: &request.model_id,
        messages: &request.messages,
        stream: false,
        options: request.max_tokens.map(|num_predict| ChatOptions { num_predict }),
    }
}

fn parse_reply(payload: &str) -> Result<String, GenerationError> {
    let parsed: ChatResponse = serde_json::from_str(payload)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
    Ok(parsed.message.content.trim().to_string())
}

fn parse_tags(payload: &str) -> Result<Vec<String>, GenerationError> {
    let parsed: TagsResponse = serde_json::from_str(payload)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
    Ok(parsed.models.into_iter().map(|m| m.name).collect())
}

impl LanguageModel for OllamaChat {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelFlag,
    ) -> Result<String, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, model = %request.model_id, messages = request.messages.len(), "ollama chat");

        let response = self
            .client
            .post(&url)
            .json(&chat_body(request))
            .send()
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "ollama chat returned non-success status");
            return Err(GenerationError::Unavailable(format!("HTTP {status}")));
        }
        let payload = response.text().map_err(|e| self.map_transport_error(e))?;

        // The request itself cannot be interrupted; drop a late reply instead.
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        parse_reply(&payload)
    }

    fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Unavailable(format!("HTTP {status}")));
        }
        let payload = response.text().map_err(|e| self.map_transport_error(e))?;
        parse_tags(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::providers::Role;

    #[test]
    fn base_url_adds_scheme_and_strips_slash() {
        assert_eq!(base_url("localhost:11434"), "http://localhost:11434");
        assert_eq!(base_url("https://llm.lan/"), "https://llm.lan");
        assert_eq!(base_url("  "), "http://localhost:11434");
    }

    #[test]
    fn chat_body_carries_reply_limit() {
        let request = GenerationRequest {
            messages: vec![
                ChatMessage::new(Role::System, "be brief"),
                ChatMessage::new(Role::User, "hi"),
            ],
            language: Language::English,
            model_id: "granite3-dense:latest".into(),
            max_tokens: Some(200),
        };
        let json = serde_json::to_value(chat_body(&request)).expect("serialize body");
        assert_eq!(json["model"], "granite3-dense:latest");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 200);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");

        let unbounded = GenerationRequest {
            max_tokens: None,
            ..request
        };
        let json = serde_json::to_value(chat_body(&unbounded)).expect("serialize body");
        assert!(json.get("options").is_none());
    }

    #[test]
    fn parses_chat_reply() {
        let payload = r#"{"model":"m","message":{"role":"assistant","content":" Hello! "},"done":true}"#;
        assert_eq!(parse_reply(payload).expect("reply"), "Hello!");
    }

    #[test]
    fn malformed_reply_is_reported() {
        assert!(matches!(
            parse_reply(r#"{"error":"model not found"}"#),
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn parses_model_tags() {
        let payload = r#"{"models":[{"name":"granite3-dense:latest"},{"name":"llama3:8b"}]}"#;
        assert_eq!(
            parse_tags(payload).expect("tags"),
            vec!["granite3-dense:latest".to_string(), "llama3:8b".to_string()]
        );
        assert!(parse_tags("{}").expect("empty tags").is_empty());
    }
}
