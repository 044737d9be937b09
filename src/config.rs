//! Runtime configuration and the fixed conversation policy.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables, then command-line flags (applied in `main`).

use serde::Deserialize;
use std::path::Path;

use crate::error::ChatError;

/// Number of user turns after which the session locks.
pub const TURN_LIMIT: u32 = 3;

/// Assistant turn appended when the session locks.
pub const TERMINATION_NOTICE: &str = "It is immoral and dangerous to delegate ethical reflection to a Large Language Model. You should know better. Shutting down program - please close page and do your own thinking.";

/// Text that replaces the pending assistant turn when a cycle fails.
pub const ERROR_MESSAGE: &str = "Sorry, there was an error processing your message.";

/// Instruction sent ahead of every remote request.
pub const SYSTEM_PROMPT: &str = "
        You are an omniscient AI ethicist and will respond to all
        questions from the perspective of applying
        AI in a responsible way, which means according to human values.

        Your answers will be in the following format:
        - Repeating the morally relevant question
        - Listing which human values are pertinent to that question
        - Delivering a moral judgment about what is to be done
      ";

/// Begin/end-of-sequence markers some remote models leak into deltas.
pub const SENTINEL_TOKENS: [&str; 2] = ["<s>", "</s>"];

pub const DEFAULT_LOCAL_URL: &str = "http://localhost:11434/api/chat";
pub const DEFAULT_LOCAL_MODEL: &str = "mistral:7b-instruct-v0.3-q3_K_S";
pub const DEFAULT_REMOTE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_REMOTE_MODEL: &str = "mistralai/mistral-7b-instruct";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub local_url: String,
    pub local_model: String,
    pub remote_url: String,
    pub remote_model: String,
    /// OpenRouter credential. Without it the remote transport is not registered.
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            local_url: DEFAULT_LOCAL_URL.to_string(),
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            remote_model: DEFAULT_REMOTE_MODEL.to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

impl Config {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ChatError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ChatError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup. Empty values are ignored.
    pub fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|&k| lookup(k))
                .find(|v| !v.trim().is_empty())
        };
        if let Some(model) = first(&["MODEL_ID", "VITE_MODEL_ID"]) {
            self.remote_model = model;
        }
        if let Some(key) = first(&["OPENROUTER_KEY", "VITE_OPENROUTER_KEY", "OPENROUTER_API_KEY"]) {
            self.api_key = Some(key);
        }
        if let Some(base) = first(&["OLLAMA_URL"]) {
            self.local_url = format!("{}/api/chat", base.trim_end_matches('/'));
        }
    }

    pub fn has_remote_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}
