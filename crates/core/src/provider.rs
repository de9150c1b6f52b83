//! Provider trait — the abstraction over streaming chat-completion backends.
//!
//! A Provider sends a transcript plus a tool catalog to an LLM and hands
//! back the response as a channel of typed [`StreamEvent`]s. Wire deltas are
//! decoded into these events exactly once, at the transport boundary, so the
//! agent loop never has to probe for optional fields.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolDefinition;

/// How the model may pick tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
        }
    }
}

/// A streamed completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model selector (e.g. "qwen", "deepseek")
    pub model: String,

    /// The transcript
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Tool selection policy
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural completion.
    Stop,
    /// The model is waiting for tool results.
    ToolCalls,
    /// Output token limit reached.
    Length,
    /// Output withheld by a content filter.
    ContentFilter,
    /// Any other provider-specific reason.
    Other(String),
}

impl FinishReason {
    /// Map the wire value of `finish_reason`.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "eos" => Self::Stop,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One fragment of a tool call, as reported at a stream index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position of the call within the response
    pub index: u32,
    /// Call id, usually only on the first fragment
    pub id: Option<String>,
    /// Function name fragment
    pub name: Option<String>,
    /// Raw argument text fragment
    pub arguments: Option<String>,
}

/// A decoded streaming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Visible answer text.
    TextDelta(String),
    /// Text on the reasoning side-channel.
    ReasoningDelta(String),
    /// A piece of a tool call.
    ToolCallDelta(ToolCallDelta),
    /// Terminal signal carrying the finish reason.
    Finish(FinishReason),
}

/// Receiving half of a provider stream.
pub type StreamReceiver = mpsc::Receiver<std::result::Result<StreamEvent, ProviderError>>;

/// The core Provider trait.
///
/// Every completion backend implements this trait. The agent loop calls
/// `stream()` without knowing which backend answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Issue a streamed completion call.
    ///
    /// An `Err` means the call could not be issued at all. Errors after the
    /// call was accepted arrive as `Err` items on the returned channel.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<StreamReceiver, ProviderError>;
}
