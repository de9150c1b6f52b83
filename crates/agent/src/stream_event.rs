//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what the gateway forwards to the client, one SSE
//! `data:` line per event. Every variant carries a `text` field so a client
//! that only concatenates `text` still renders the whole run.

use serde::{Deserialize, Serialize};

/// Events emitted by the agent during a run.
///
/// - `chunk`      — answer text from the model
/// - `reasoning`  — reasoning text, bracketed by `<think>` markers
/// - `tool_start` — a tool is about to be called
/// - `tool_end`   — a tool call finished
/// - `notice`     — informational message (cancellation, iteration cap, veto)
/// - `error`      — the run was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Chunk { text: String },

    Reasoning { text: String },

    ToolStart { name: String, text: String },

    ToolEnd {
        name: String,
        success: bool,
        text: String,
    },

    Notice { text: String },

    Error { text: String },
}

impl AgentStreamEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { text: text.into() }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    pub fn tool_start(name: &str) -> Self {
        Self::ToolStart {
            name: name.to_string(),
            text: format!("\n\n> Calling tool `{name}`...\n\n"),
        }
    }

    pub fn tool_end(name: &str, success: bool) -> Self {
        let text = if success {
            format!("> Tool `{name}` finished\n\n")
        } else {
            format!("> Tool `{name}` reported an error\n\n")
        };
        Self::ToolEnd {
            name: name.to_string(),
            success,
            text,
        }
    }

    /// The display text of this event.
    pub fn text(&self) -> &str {
        match self {
            Self::Chunk { text }
            | Self::Reasoning { text }
            | Self::ToolStart { text, .. }
            | Self::ToolEnd { text, .. }
            | Self::Notice { text }
            | Self::Error { text } => text,
        }
    }

    /// Event type name, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::Notice { .. } => "notice",
            Self::Error { .. } => "error",
        }
    }
}
