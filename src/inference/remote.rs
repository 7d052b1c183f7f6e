//! Remote fallback inference provider
//!
//! An alternative [`GenerationBackend`] backed by an OpenRouter-style
//! streaming chat-completion endpoint. The orchestrator stays agnostic to
//! which backend executes a turn; this one trades on-device privacy for
//! capability when a model cannot run locally. The bearer token is read
//! from the environment, never persisted.

use crate::inference::streaming::{CancelFlag, FinishReason, StreamToken, TokenStream};
use crate::inference::{GenerationBackend, SessionError};
use crate::net::Connectivity;
use crate::storage::settings::RemoteSettings;
use crate::types::{GenerationRequest, ModelConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Environment variable holding the bearer token
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

// ============================================================================
// Provider
// ============================================================================

/// Streaming chat-completion backend over HTTPS
pub struct RemoteProvider {
    endpoint: String,
    model: String,
    connectivity: Arc<dyn Connectivity>,
    api_key_override: Option<String>,
    cancel: CancelFlag,
}

impl RemoteProvider {
    pub fn new(settings: &RemoteSettings, connectivity: Arc<dyn Connectivity>) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            connectivity,
            api_key_override: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Use an explicit bearer token instead of the environment
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key_override = Some(api_key.into());
        self
    }

    fn resolve_api_key(&self) -> Result<String, SessionError> {
        if let Some(key) = &self.api_key_override {
            return Ok(key.clone());
        }
        std::env::var(API_KEY_ENV).map_err(|_| {
            SessionError::Unavailable(format!("{API_KEY_ENV} environment variable not set"))
        })
    }
}

#[async_trait]
impl GenerationBackend for RemoteProvider {
    async fn ensure_ready(&self, _config: &ModelConfig) -> Result<(), SessionError> {
        if !self.connectivity.is_online() {
            return Err(SessionError::Unavailable("device is offline".to_string()));
        }
        self.resolve_api_key()?;
        Ok(())
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, SessionError> {
        self.cancel.reset();
        let api_key = self.resolve_api_key()?;

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            stop: request.stop.clone(),
            stream: true,
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SessionError::Unavailable(format!("HTTP client: {e}")))?;

        let response = client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SessionError::Unavailable(format!(
                "remote error ({status}): {text}"
            )));
        }

        tracing::debug!("Remote stream open: {} via {}", self.model, self.endpoint);
        let (tx, stream) = TokenStream::channel();
        tokio::spawn(forward_stream(response, tx, self.cancel.clone()));
        Ok(stream)
    }

    fn cancel(&self) {
        self.cancel.request();
    }
}

/// Forward server-sent deltas into the token stream, observing the cancel
/// flag at chunk granularity
async fn forward_stream(
    mut response: reqwest::Response,
    tx: mpsc::Sender<StreamToken>,
    cancel: CancelFlag,
) {
    let mut buffer = String::new();
    let mut finish = FinishReason::EndOfStream;

    'outer: loop {
        if cancel.requested() {
            finish = FinishReason::Cancelled;
            break;
        }

        match response.chunk().await {
            Ok(Some(chunk)) => {
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);
                    match parse_sse_line(&line) {
                        Some(SseEvent::Chunk { delta, finish_reason }) => {
                            if let Some(reason) = finish_reason {
                                finish = map_finish_reason(&reason);
                            }
                            if let Some(text) = delta {
                                if tx.send(StreamToken::Token(text)).await.is_err() {
                                    // Consumer dropped the stream
                                    finish = FinishReason::Cancelled;
                                    break 'outer;
                                }
                            }
                        }
                        Some(SseEvent::Done) => break 'outer,
                        None => {}
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(StreamToken::Error(e.to_string())).await;
                return;
            }
        }
    }

    let _ = tx.send(StreamToken::Done(finish)).await;
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Chunk {
        delta: Option<String>,
        finish_reason: Option<String>,
    },
    Done,
}

fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let parsed: StreamChunk = serde_json::from_str(data).ok()?;
    let choice = parsed.choices.into_iter().next()?;
    Some(SseEvent::Chunk {
        delta: choice.delta.and_then(|d| d.content),
        finish_reason: choice.finish_reason,
    })
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::MaxTokens,
        _ => FinishReason::EndOfStream,
    }
}
