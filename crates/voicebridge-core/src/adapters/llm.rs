//! Streaming LLM adapter contract.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Hard upper bound on total generation time per spec §4.5/§5.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// A lazy, finite, single-shot stream of generated text chunks.
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<String, PipelineError>> + Send>>;

/// Abstract streaming text generator.
///
/// The returned stream must terminate promptly once `cancel` fires, and
/// must fail with [`PipelineError::Timeout`] if generation exceeds the
/// adapter's configured cap.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn generate(
        &self,
        prompt: String,
        system_prompt: Option<String>,
        cancel: CancellationToken,
    ) -> Result<LlmStream, PipelineError>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// An OpenAI-chat-completions-compatible streaming client, usable against
/// any vendor exposing the same `/v1/chat/completions` SSE shape.
pub struct OpenAiCompatibleLlm {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatibleLlm {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Extract the delta content of one SSE `data: {...}` line, if any.
fn parse_sse_line(line: &str) -> Option<Result<String, PipelineError>> {
    let payload = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return Some(Err(PipelineError::AdapterRuntimeFailed(e.to_string()))),
    };
    let content = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|s| s.as_str())
        .unwrap_or("");
    if content.is_empty() {
        None
    } else {
        Some(Ok(content.to_string()))
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatibleLlm {
    async fn generate(
        &self,
        prompt: String,
        system_prompt: Option<String>,
        cancel: CancellationToken,
    ) -> Result<LlmStream, PipelineError> {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::AdapterInitFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::AdapterInitFailed(format!(
                "llm endpoint returned {}",
                response.status()
            )));
        }

        let byte_stream = response.bytes_stream();
        let deadline = Instant::now() + self.timeout;

        let stream = futures_util::stream::unfold(
            (byte_stream, String::new(), cancel, deadline, false),
            move |(mut byte_stream, mut buffer, cancel, deadline, done)| async move {
                if done {
                    return None;
                }
                loop {
                    // Serve any already-buffered complete line before
                    // pulling more bytes off the wire.
                    if let Some(pos) = buffer.find('\n') {
                        let line = buffer[..pos].trim_end().to_string();
                        buffer.drain(..=pos);
                        if let Some(result) = parse_sse_line(&line) {
                            return Some((result, (byte_stream, buffer, cancel, deadline, false)));
                        }
                        continue;
                    }

                    tokio::select! {
                        () = cancel.cancelled() => {
                            return None;
                        }
                        () = tokio::time::sleep_until(deadline) => {
                            let err = PipelineError::Timeout("llm generation exceeded cap".into());
                            return Some((Err(err), (byte_stream, buffer, cancel, deadline, true)));
                        }
                        chunk = byte_stream.next() => {
                            match chunk {
                                None => return None,
                                Some(Ok(bytes)) => {
                                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                                }
                                Some(Err(e)) => {
                                    let err = PipelineError::AdapterRuntimeFailed(e.to_string());
                                    return Some((Err(err), (byte_stream, buffer, cancel, deadline, true)));
                                }
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
