//! Scripted collaborators for agent loop tests.

use async_trait::async_trait;
use dispatch_core::error::ProviderError;
use dispatch_core::message::Message;
use dispatch_core::provider::{
    FinishReason, Provider, ProviderRequest, StreamEvent, StreamReceiver, ToolCallDelta,
};
use dispatch_core::tool::{ToolDefinition, ToolInvoker, ToolOutcome};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted completion call.
pub enum Script {
    /// The call is accepted and streams these items.
    Stream(Vec<Result<StreamEvent, ProviderError>>),
    /// The call cannot be issued.
    Refuse(ProviderError),
}

/// A provider that plays back one script per call and records requests.
///
/// Panics if more calls are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<StreamReceiver, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no script for call #{call}"));

        match script {
            Script::Refuse(err) => Err(err),
            Script::Stream(items) => {
                let (tx, rx) = mpsc::channel(items.len().max(1));
                for item in items {
                    tx.try_send(item).unwrap();
                }
                Ok(rx)
            }
        }
    }
}

/// A text-only answer that finishes with `stop`.
pub fn text_turn(text: &str) -> Script {
    Script::Stream(vec![
        Ok(StreamEvent::TextDelta(text.into())),
        Ok(StreamEvent::Finish(FinishReason::Stop)),
    ])
}

/// A turn requesting the given `(name, arguments)` tool calls.
pub fn tool_turn(calls: &[(&str, serde_json::Value)]) -> Script {
    let mut items: Vec<Result<StreamEvent, ProviderError>> = calls
        .iter()
        .enumerate()
        .map(|(i, (name, args))| {
            Ok(StreamEvent::ToolCallDelta(ToolCallDelta {
                index: i as u32,
                id: Some(format!("call_{name}_{i}")),
                name: Some(name.to_string()),
                arguments: Some(args.to_string()),
            }))
        })
        .collect();
    items.push(Ok(StreamEvent::Finish(FinishReason::ToolCalls)));
    Script::Stream(items)
}

/// One recorded tool invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A tool invoker with canned outcomes per tool name.
///
/// Outcomes queued for a name are used in order; the last one repeats.
/// Tools without outcomes answer `Ok("ok")`.
pub struct MockTools {
    catalog: Vec<ToolDefinition>,
    outcomes: Mutex<HashMap<String, VecDeque<ToolOutcome>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Duration,
}

impl MockTools {
    pub fn new() -> Self {
        let catalog = [
            "list_devices",
            "fetch_live_config",
            "fetch_related_knowledge",
            "propose_configuration",
            "push_configuration",
        ]
        .iter()
        .map(|name| ToolDefinition {
            name: name.to_string(),
            description: format!("{name} tool"),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "topology_id": {"type": "string"},
                    "model_name": {"type": "string"}
                },
                "required": ["topology_id"]
            }),
        })
        .collect();

        Self {
            catalog,
            outcomes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Make every call take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_outcomes(self, name: &str, outcomes: Vec<ToolOutcome>) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(name.to_string(), outcomes.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.name == name).count()
    }
}

#[async_trait]
impl ToolInvoker for MockTools {
    async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.catalog.clone()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        _timeout: Duration,
    ) -> ToolOutcome {
        self.calls.lock().unwrap().push(RecordedCall {
            name: name.to_string(),
            arguments,
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut outcomes = self.outcomes.lock().unwrap();
        match outcomes.get_mut(name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(ToolOutcome::Ok("ok".into())),
            None => ToolOutcome::Ok("ok".into()),
        }
    }
}

/// Seed history of one question/answer pair.
pub fn history_pair(question: &str, answer: &str) -> Vec<Message> {
    vec![Message::user(question), Message::assistant(answer)]
}
