//! LightRAG knowledge service client.
//!
//! Two uses:
//! - `query` returns retrieval context only (`only_need_context`), handed
//!   to the agent as the output of `fetch_related_knowledge`.
//! - `stream_answer` streams a generated answer for the non-agent chat
//!   modes. The service emits one JSON object per line, optionally with an
//!   SSE `data:` prefix; `response` fields carry text and `references`
//!   lines are skipped.

use async_trait::async_trait;
use dispatch_core::error::ProviderError;
use dispatch_core::knowledge::{AnswerReceiver, AnswerRequest, KnowledgeSource, RetrievalMode};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace, warn};

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for per-model LightRAG instances.
pub struct LightRagClient {
    /// Knowledge service base URL per model
    endpoints: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl LightRagClient {
    pub fn new(endpoints: BTreeMap<String, String>) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|(model, url)| (model, url.trim_end_matches('/').to_string()))
            .collect();
        Self {
            endpoints,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> Option<&str> {
        self.endpoints.get(model).map(String::as_str)
    }

    fn query_payload(query: &str, mode: RetrievalMode) -> serde_json::Value {
        serde_json::json!({
            "query": query,
            "mode": mode.as_str(),
            "only_need_context": true,
            "only_need_prompt": false,
            "response_type": "Multiple Paragraphs",
            "top_k": 60,
            "chunk_top_k": 10,
            "max_entity_tokens": 1000,
            "max_relation_tokens": 1000,
            "max_total_tokens": 4096,
            "enable_rerank": false,
            "include_references": false,
            "include_chunk_content": false,
            "stream": false,
        })
    }

    fn answer_payload(request: &AnswerRequest) -> serde_json::Value {
        let history: Vec<serde_json::Value> = request
            .history
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        serde_json::json!({
            "query": request.query,
            "mode": request.mode.as_str(),
            "only_need_context": false,
            "only_need_prompt": false,
            "response_type": "Multiple Paragraphs",
            "top_k": 60,
            "chunk_top_k": 10,
            "max_entity_tokens": 1000,
            "max_relation_tokens": 1000,
            "max_total_tokens": 4096,
            "conversation_history": history,
            "enable_rerank": false,
            "include_references": false,
            "include_chunk_content": false,
            "stream": true,
        })
    }
}

/// Extract answer text from one streamed line.
fn answer_text(line: &str) -> Option<String> {
    let line = line.trim();
    let line = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if line.is_empty() {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    if value.get("references").is_some() {
        return None;
    }
    value
        .get("response")
        .and_then(|r| r.as_str())
        .filter(|text| !text.is_empty())
        .map(String::from)
}

#[async_trait]
impl KnowledgeSource for LightRagClient {
    fn name(&self) -> &str {
        "lightrag"
    }

    async fn query(&self, text: &str, model: &str) -> String {
        let Some(base) = self.endpoint(model) else {
            return format!("Error: no knowledge service configured for model '{model}'");
        };

        debug!(model = %model, "Querying knowledge base");

        let result = self
            .client
            .post(format!("{base}/query/stream"))
            .timeout(QUERY_TIMEOUT)
            .json(&Self::query_payload(text, RetrievalMode::Mix))
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => return format!("Failed to reach {base}: {e}"),
        };

        let status = response.status().as_u16();
        if status != 200 {
            warn!(model = %model, status, "Knowledge service returned an error");
            return format!("Error: LLM Server returned status {status}");
        }

        match response.text().await {
            Ok(body) => body,
            Err(e) => format!("Failed to reach {base}: {e}"),
        }
    }

    async fn stream_answer(&self, request: AnswerRequest) -> Result<AnswerReceiver, ProviderError> {
        let base = self
            .endpoint(&request.model)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "no knowledge service configured for model '{}'",
                    request.model
                ))
            })?
            .to_string();

        let response = self
            .client
            .post(format!("{base}/query/stream"))
            .json(&Self::answer_payload(&request))
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("Failed to reach {base}: {e}")))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ProviderError::ApiError {
                status_code: status,
                message: format!("LLM Server Error: {status}"),
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            // Raw bytes: a chunk boundary may fall inside a multibyte character
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=line_end).collect();
                    let Ok(line) = std::str::from_utf8(&line) else {
                        trace!("Skipping knowledge stream line that is not UTF-8");
                        continue;
                    };
                    match answer_text(line) {
                        Some(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        None => trace!(line = %line.trim(), "Skipping knowledge stream line"),
                    }
                }
            }

            // Trailing line without a newline
            if let Some(text) = std::str::from_utf8(&buffer).ok().and_then(answer_text) {
                let _ = tx.send(Ok(text)).await;
            }
        });

        Ok(rx)
    }
}
