//! Streaming delta decoder.
//!
//! Turns the typed [`StreamEvent`]s of one completion call into live output
//! fragments plus, once the stream ends, the accumulated assistant turn.
//! Reasoning text is bracketed by `<think>` / `</think> ` markers so that a
//! client concatenating every fragment sees one coherent transcript.

use dispatch_core::message::MessageToolCall;
use dispatch_core::provider::{FinishReason, StreamEvent, ToolCallDelta};
use std::collections::BTreeMap;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think> ";

/// A piece of output to forward to the client as soon as it is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Visible answer text.
    Content(String),
    /// Reasoning text, including the opening and closing markers.
    Reasoning(String),
}

impl Fragment {
    pub fn text(&self) -> &str {
        match self {
            Self::Content(t) | Self::Reasoning(t) => t,
        }
    }
}

/// Everything one completion call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedTurn {
    pub content: String,
    pub reasoning: String,
    /// Completed tool calls, ordered by stream index
    pub tool_calls: Vec<MessageToolCall>,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReasoningState {
    NotStarted,
    Open,
    Closed,
}

/// Accumulates one streamed completion.
pub struct DeltaDecoder {
    content: String,
    reasoning: String,
    state: ReasoningState,
    calls: BTreeMap<u32, PartialCall>,
    finish_reason: Option<FinishReason>,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            reasoning: String::new(),
            state: ReasoningState::NotStarted,
            calls: BTreeMap::new(),
            finish_reason: None,
        }
    }

    /// Feed one event, returning the fragments to forward immediately.
    pub fn feed(&mut self, event: StreamEvent) -> Vec<Fragment> {
        let mut out = Vec::new();
        match event {
            StreamEvent::ReasoningDelta(text) => {
                if self.state == ReasoningState::NotStarted {
                    self.state = ReasoningState::Open;
                    self.reasoning.push_str(THINK_OPEN);
                    out.push(Fragment::Reasoning(THINK_OPEN.into()));
                }
                self.reasoning.push_str(&text);
                out.push(Fragment::Reasoning(text));
            }
            StreamEvent::ToolCallDelta(delta) => self.accumulate(delta),
            StreamEvent::TextDelta(text) => {
                out.extend(self.close_reasoning());
                if !text.is_empty() {
                    self.content.push_str(&text);
                    out.push(Fragment::Content(text));
                }
            }
            StreamEvent::Finish(reason) => {
                out.extend(self.close_reasoning());
                self.finish_reason = Some(reason);
            }
        }
        out
    }

    /// End of stream: the accumulated turn plus any marker still owed.
    pub fn finish(mut self) -> (DecodedTurn, Vec<Fragment>) {
        let trailing: Vec<Fragment> = self.close_reasoning().into_iter().collect();
        let tool_calls = self
            .calls
            .into_iter()
            .map(|(index, call)| MessageToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{index}")),
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        let turn = DecodedTurn {
            content: self.content,
            reasoning: self.reasoning,
            tool_calls,
            finish_reason: self.finish_reason,
        };
        (turn, trailing)
    }

    fn close_reasoning(&mut self) -> Option<Fragment> {
        if self.state != ReasoningState::Open {
            return None;
        }
        self.state = ReasoningState::Closed;
        self.reasoning.push_str(THINK_CLOSE);
        Some(Fragment::Reasoning(THINK_CLOSE.into()))
    }

    fn accumulate(&mut self, delta: ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_default();
        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            call.id = Some(id);
        }
        if let Some(name) = delta.name {
            call.name.push_str(&name);
        }
        if let Some(arguments) = delta.arguments {
            call.arguments.push_str(&arguments);
        }
    }
}

impl Default for DeltaDecoder {
    fn default() -> Self {
        Self::new()
    }
}
