//! Backend transports and token-stream normalization.
//!
//! Ollama answers with newline-delimited JSON, OpenRouter with server-sent
//! events. Both are reduced to the same [`TokenStream`]: a lazy sequence of
//! non-empty text fragments that ends on end-of-body or on the first error.

use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use std::pin::Pin;
use tracing::debug;

use crate::config::{Config, SENTINEL_TOKENS, SYSTEM_PROMPT};
use crate::error::ChatError;
use crate::providers::*;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Turns one line of a response body into at most one token.
pub type LineParser = fn(&str) -> Result<Option<String>, ChatError>;

/// Anything that can open a token stream for a message on a given backend.
pub trait StreamOpener {
    fn open_stream(&self, message: &str, backend: Backend) -> TokenStream;

    /// Open a stream for a backend given by name, as the selector UI sends it.
    /// Unknown names produce a stream that fails with `UnsupportedBackend`.
    fn open_stream_named(&self, message: &str, backend: &str) -> TokenStream {
        match backend.parse::<Backend>() {
            Ok(b) => self.open_stream(message, b),
            Err(e) => failed(e),
        }
    }
}

/// A stream whose only item is `err`.
pub fn failed(err: ChatError) -> TokenStream {
    Box::pin(stream::once(async move { Err::<String, ChatError>(err) }))
}

// ---------------------------------------------------------------------------
// Line parsers
// ---------------------------------------------------------------------------

/// Parse one NDJSON line from Ollama `/api/chat`.
///
/// Blank lines and objects without `message.content` yield nothing. An
/// `error` field or invalid JSON is a transport failure.
pub fn parse_local_line(line: &str) -> Result<Option<String>, ChatError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: OllamaChatLine = serde_json::from_str(line)?;
    if let Some(err) = parsed.error {
        return Err(ChatError::TransportFailure(format!("ollama: {}", err)));
    }
    Ok(parsed
        .message
        .and_then(|m| m.content)
        .filter(|c| !c.is_empty()))
}

/// Keep a remote delta only if it carries real text.
pub fn filter_remote_delta(content: Option<&str>) -> Option<String> {
    match content {
        Some(c) if !c.is_empty() && !SENTINEL_TOKENS.contains(&c) => Some(c.to_string()),
        _ => None,
    }
}

/// Parse one SSE line from the OpenRouter streaming endpoint.
///
/// Only `data:` lines carry chunks. Comment lines (`: OPENROUTER PROCESSING`)
/// and the `[DONE]` marker yield nothing.
pub fn parse_remote_line(line: &str) -> Result<Option<String>, ChatError> {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim_start();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }
    let chunk: OpenRouterChunk = serde_json::from_str(payload)?;
    if let Some(err) = chunk.error {
        return Err(ChatError::TransportFailure(format!("openrouter: {}", err.message)));
    }
    Ok(filter_remote_delta(
        chunk.choices.first().and_then(|c| c.delta.content.as_deref()),
    ))
}

// ---------------------------------------------------------------------------
// Body decoding
// ---------------------------------------------------------------------------

struct LineState<S> {
    body: Pin<Box<S>>,
    buf: Vec<u8>,
    eof: bool,
    finished: bool,
    parse: LineParser,
}

/// Split a chunked byte body on `\n` and run each line through `parse`.
///
/// Lines may straddle chunk boundaries; a trailing line without a newline is
/// parsed at end of body. The first error ends the stream.
pub fn decode_lines<S, B, E>(body: S, parse: LineParser) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = LineState {
        body: Box::pin(body),
        buf: Vec::new(),
        eof: false,
        finished: false,
        parse,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line);
                match (st.parse)(&text) {
                    Ok(Some(token)) => return Some((Ok(token), st)),
                    Ok(None) => continue,
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
            }

            if st.eof {
                st.finished = true;
                if st.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buf);
                let text = String::from_utf8_lossy(&rest);
                return match (st.parse)(&text) {
                    Ok(Some(token)) => Some((Ok(token), st)),
                    Ok(None) => None,
                    Err(e) => Some((Err(e), st)),
                };
            }

            match st.body.next().await {
                Some(Ok(bytes)) => st.buf.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(ChatError::TransportFailure(e.to_string())), st));
                }
                None => st.eof = true,
            }
        }
    }))
}

/// Send the request and turn its body into tokens once the head arrives.
fn open_request(req: reqwest::RequestBuilder, parse: LineParser) -> TokenStream {
    let head = async move {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::TransportFailure(format!("HTTP {}: {}", status, body)));
        }
        Ok::<TokenStream, ChatError>(decode_lines(response.bytes_stream(), parse))
    };
    Box::pin(stream::once(head).try_flatten())
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// Ollama `/api/chat` with `stream: true`.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    client: Client,
    pub url: String,
    pub model: String,
}

impl LocalTransport {
    pub fn new(client: Client, url: String, model: String) -> Self {
        LocalTransport { client, url, model }
    }

    pub fn request_body(&self, message: &str) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(message)],
            stream: true,
        }
    }

    pub fn open(&self, message: &str) -> TokenStream {
        debug!(url = %self.url, model = %self.model, "opening local stream");
        let req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(message));
        open_request(req, parse_local_line)
    }
}

/// OpenRouter chat completions with `stream: true`.
#[derive(Debug, Clone)]
pub struct RemoteTransport {
    client: Client,
    api_key: String,
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl RemoteTransport {
    pub fn new(client: Client, config: &Config, api_key: String) -> Self {
        RemoteTransport {
            client,
            api_key,
            url: config.remote_url.clone(),
            model: config.remote_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn request_body(&self, message: &str) -> OpenRouterChatRequest {
        OpenRouterChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(message)],
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn open(&self, message: &str) -> TokenStream {
        debug!(url = %self.url, model = %self.model, "opening remote stream");
        let req = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(message));
        open_request(req, parse_remote_line)
    }
}

/// One transport per backend variant.
#[derive(Debug, Clone)]
pub enum Transport {
    Local(LocalTransport),
    Remote(RemoteTransport),
}

impl Transport {
    pub fn backend(&self) -> Backend {
        match self {
            Transport::Local(_) => Backend::Local,
            Transport::Remote(_) => Backend::Remote,
        }
    }

    pub fn open(&self, message: &str) -> TokenStream {
        match self {
            Transport::Local(t) => t.open(message),
            Transport::Remote(t) => t.open(message),
        }
    }
}

/// The transports available to this process, looked up by backend.
#[derive(Debug, Clone, Default)]
pub struct Transports {
    entries: Vec<Transport>,
}

impl Transports {
    /// Local is always registered; remote only when a credential is configured.
    pub fn from_config(config: &Config) -> Self {
        let client = Client::new();
        let mut transports = Transports::default();
        transports.register(Transport::Local(LocalTransport::new(
            client.clone(),
            config.local_url.clone(),
            config.local_model.clone(),
        )));
        if let Some(key) = config.api_key.clone().filter(|k| !k.trim().is_empty()) {
            transports.register(Transport::Remote(RemoteTransport::new(client, config, key)));
        }
        transports
    }

    /// Add a transport, replacing any existing one for the same backend.
    pub fn register(&mut self, transport: Transport) {
        self.entries.retain(|t| t.backend() != transport.backend());
        self.entries.push(transport);
    }

    pub fn supports(&self, backend: Backend) -> bool {
        self.entries.iter().any(|t| t.backend() == backend)
    }
}

impl StreamOpener for Transports {
    fn open_stream(&self, message: &str, backend: Backend) -> TokenStream {
        match self.entries.iter().find(|t| t.backend() == backend) {
            Some(t) => t.open(message),
            None => failed(ChatError::UnsupportedBackend(backend.to_string())),
        }
    }
}
