use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ChatError;

/// Which model backend answers the conversation.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Ollama on the local machine.
    Local,
    /// OpenRouter hosted inference.
    #[default]
    #[value(alias = "inference")]
    Remote,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Local => write!(f, "local"),
            Backend::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for Backend {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "remote" | "inference" => Ok(Backend::Remote),
            other => Err(ChatError::UnsupportedBackend(other.to_string())),
        }
    }
}

// -- Shared chat message ----------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        ChatMessage { role: "system".to_string(), content: content.to_string() }
    }

    pub fn user(content: &str) -> Self {
        ChatMessage { role: "user".to_string(), content: content.to_string() }
    }
}

// -- Ollama NDJSON types ----------------------------------------------------

#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct OllamaMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// One line of the `/api/chat` response body.
#[derive(Debug, Deserialize)]
pub struct OllamaChatLine {
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub error: Option<String>,
}

// -- OpenRouter SSE types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct OpenRouterChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterChoice {
    pub delta: OpenRouterDelta,
    #[allow(dead_code)]
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterChunk {
    #[serde(default)]
    pub choices: Vec<OpenRouterChoice>,
    #[serde(default)]
    pub error: Option<OpenRouterError>,
}
