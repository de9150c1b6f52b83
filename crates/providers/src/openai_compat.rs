//! OpenAI-compatible streaming provider.
//!
//! Works with llama.cpp server, vLLM, Ollama and any endpoint exposing
//! `/v1/chat/completions` with server-sent events.
//!
//! Each `data:` line is decoded once into typed [`StreamEvent`]s, including
//! the `reasoning_content` channel that reasoning models stream separately
//! from the answer text.

use async_trait::async_trait;
use dispatch_core::error::ProviderError;
use dispatch_core::message::{Message, Role};
use dispatch_core::provider::*;
use dispatch_core::tool::ToolDefinition;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    completion_timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    /// Bound on connecting and on the gap between streamed chunks.
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Convert our Message types to OpenAI API format.
    ///
    /// Content is always sent as a string, empty when the assistant only
    /// called tools; some local servers reject a null content.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                tool_calls: if m.role == Role::Assistant && !m.tool_calls.is_empty() {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                } else {
                    None
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": true,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!(request.tool_choice.as_str());
        }

        body
    }
}

/// Decode one SSE `data:` payload into stream events.
///
/// Returns `None` for payloads that are not valid chunks; those are skipped.
fn decode_chunk(data: &str) -> Option<Vec<StreamEvent>> {
    let chunk: StreamResponse = serde_json::from_str(data).ok()?;
    let mut events = Vec::new();

    for choice in chunk.choices {
        let delta = choice.delta;

        if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
            events.push(StreamEvent::ReasoningDelta(reasoning));
        }

        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::TextDelta(content));
        }

        for tc in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }));
        }

        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::Finish(FinishReason::from_wire(&reason)));
        }
    }

    Some(events)
}

/// Handle one complete SSE line.
///
/// Returns `false` once the stream is over: `[DONE]` arrived or the
/// receiver went away.
async fn forward_line(
    line: &[u8],
    tx: &mpsc::Sender<Result<StreamEvent, ProviderError>>,
    provider_name: &str,
) -> bool {
    let Ok(line) = std::str::from_utf8(line) else {
        trace!(provider = %provider_name, "Ignoring SSE line that is not UTF-8");
        return true;
    };
    let line = line.trim_end_matches('\r');

    // Skip empty lines and SSE comments
    if line.is_empty() || line.starts_with(':') {
        return true;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return true;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return false;
    }

    match decode_chunk(data) {
        Some(events) => {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    return false; // receiver dropped
                }
            }
        }
        None => {
            trace!(
                provider = %provider_name,
                data = %data,
                "Ignoring unparseable SSE chunk"
            );
        }
    }
    true
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<StreamReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.completion_timeout, send)
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "no response from {url} within {} seconds",
                    self.completion_timeout.as_secs()
                ))
            })?
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();
        let chunk_timeout = self.completion_timeout;

        // Read the SSE byte stream and decode each complete line
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            // Raw bytes: a chunk boundary may fall inside a multibyte character
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let next = match tokio::time::timeout(chunk_timeout, byte_stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let _ = tx
                            .send(Err(ProviderError::Timeout(format!(
                                "stream stalled for {} seconds",
                                chunk_timeout.as_secs()
                            ))))
                            .await;
                        return;
                    }
                };

                let bytes = match next {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                    None => break,
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=line_end).collect();
                    if !forward_line(&line[..line_end], &tx, &provider_name).await {
                        return;
                    }
                }
            }

            // Final line without a trailing newline
            if !buffer.is_empty() && !forward_line(&buffer, &tx, &provider_name).await {
                return;
            }

            debug!(provider = %provider_name, "Stream ended without [DONE]");
        });

        Ok(rx)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
