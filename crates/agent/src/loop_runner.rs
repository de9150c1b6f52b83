//! The agent reasoning loop.
//!
//! One run streams a completion, dispatches the tool calls it asked for,
//! feeds the results back and repeats until the model answers without tool
//! calls, the iteration cap is hit, the operator cancels, or the transport
//! fails.

use crate::cancel::{CancelGuard, CancellationRegistry};
use crate::decoder::{DeltaDecoder, Fragment};
use crate::prompt::system_prompt;
use crate::retry::{RetryLimiter, push_targets};
use crate::schema::adapt_catalog;
use crate::stream_event::AgentStreamEvent;
use crate::transcript::Transcript;
use chrono::Utc;
use dispatch_config::AgentConfig;
use dispatch_core::event::{DomainEvent, EventBus};
use dispatch_core::message::{Message, MessageToolCall, SessionId};
use dispatch_core::provider::{Provider, ProviderRequest};
use dispatch_core::tool::{ToolDefinition, ToolInvoker, ToolOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const PUSH_TOOL: &str = "push_configuration";
pub const KNOWLEDGE_TOOL: &str = "fetch_related_knowledge";

const CANCELLED_NOTICE: &str = "\n\n**Agent stopped by user**\n\n";
const EMPTY_RESULT: &str = "Tool executed successfully (no output)";

/// Input of one agent run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub session_id: SessionId,
    pub topology_id: String,
    pub model: String,
    pub user_query: String,
    /// Prior conversation, oldest first
    pub history: Vec<Message>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Natural completion or the iteration cap.
    Stopped,
    /// The operator asked the run to stop.
    Cancelled,
    /// The model could not be reached or the stream broke.
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        }
    }
}

/// Summary handed back when a run ends.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub outcome: RunOutcome,
    pub iterations: usize,
    pub tool_calls_made: usize,
    /// Everything streamed to the client, for persistence. `None` when aborted.
    pub reply: Option<String>,
    pub transcript: Vec<Message>,
}

/// The network automation agent loop.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolInvoker>,
    cancellations: Arc<CancellationRegistry>,
    event_bus: Option<Arc<EventBus>>,
    max_iterations: usize,
    tool_timeout: Duration,
    tool_pause: Duration,
    token_budget: usize,
    chars_per_token: usize,
    max_push_failures: u32,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolInvoker>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        let defaults = AgentConfig::default();
        Self {
            provider,
            tools,
            cancellations,
            event_bus: None,
            max_iterations: defaults.max_iterations,
            tool_timeout: defaults.tool_timeout(),
            tool_pause: defaults.tool_pause(),
            token_budget: defaults.token_budget,
            chars_per_token: defaults.chars_per_token,
            max_push_failures: defaults.max_push_failures,
        }
    }

    /// Apply the `[agent]` configuration section.
    pub fn with_config(mut self, config: &AgentConfig) -> Self {
        self.max_iterations = config.max_iterations;
        self.tool_timeout = config.tool_timeout();
        self.tool_pause = config.tool_pause();
        self.token_budget = config.token_budget;
        self.chars_per_token = config.chars_per_token;
        self.max_push_failures = config.max_push_failures;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_tool_pause(mut self, pause: Duration) -> Self {
        self.tool_pause = pause;
        self
    }

    pub fn with_token_budget(mut self, token_budget: usize, chars_per_token: usize) -> Self {
        self.token_budget = token_budget;
        self.chars_per_token = chars_per_token;
        self
    }

    pub fn with_max_push_failures(mut self, limit: u32) -> Self {
        self.max_push_failures = limit;
        self
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    /// The catalog as the model sees it.
    pub async fn adapted_tools(&self) -> Vec<ToolDefinition> {
        adapt_catalog(&self.tools.list_tools().await)
    }

    /// Spawn a run on its own task.
    ///
    /// Events arrive on the receiver while the run progresses; the handle
    /// resolves to the report once it ends.
    pub fn run_stream(
        self: &Arc<Self>,
        run: AgentRun,
    ) -> (mpsc::Receiver<AgentStreamEvent>, JoinHandle<AgentReport>) {
        let (tx, rx) = mpsc::channel(128);
        let agent = Arc::clone(self);
        let handle = tokio::spawn(async move { agent.run(run, tx).await });
        (rx, handle)
    }

    /// Execute one run, sending events to `tx`.
    pub async fn run(&self, run: AgentRun, tx: mpsc::Sender<AgentStreamEvent>) -> AgentReport {
        let guard = self.cancellations.register(&run.session_id);
        let mut state = RunState {
            tx,
            streamed: String::new(),
            transcript: Transcript::seed(
                system_prompt(&run.topology_id),
                run.history.clone(),
                &run.user_query,
            )
            .with_budget(self.token_budget, self.chars_per_token),
            retry: RetryLimiter::new(self.max_push_failures),
            iterations: 0,
            tool_calls_made: 0,
        };

        info!(
            session_id = %run.session_id,
            topology_id = %run.topology_id,
            model = %run.model,
            "Agent run started"
        );
        self.publish(DomainEvent::AgentStarted {
            session_id: run.session_id.to_string(),
            topology_id: run.topology_id.clone(),
            model: run.model.clone(),
            timestamp: Utc::now(),
        });

        let catalog = self.adapted_tools().await;
        let outcome = self.drive(&run, &guard, &catalog, &mut state).await;
        drop(guard);

        info!(
            session_id = %run.session_id,
            outcome = outcome.as_str(),
            iterations = state.iterations,
            tool_calls = state.tool_calls_made,
            "Agent run finished"
        );
        self.publish(DomainEvent::AgentFinished {
            session_id: run.session_id.to_string(),
            outcome: outcome.as_str().to_string(),
            iterations: state.iterations,
            tool_calls_made: state.tool_calls_made,
            timestamp: Utc::now(),
        });

        AgentReport {
            outcome,
            iterations: state.iterations,
            tool_calls_made: state.tool_calls_made,
            reply: match outcome {
                RunOutcome::Aborted => None,
                _ => Some(state.streamed),
            },
            transcript: state.transcript.into_messages(),
        }
    }

    async fn drive(
        &self,
        run: &AgentRun,
        guard: &CancelGuard,
        catalog: &[ToolDefinition],
        state: &mut RunState,
    ) -> RunOutcome {
        loop {
            if guard.is_cancelled() {
                state.emit(AgentStreamEvent::notice(CANCELLED_NOTICE)).await;
                return RunOutcome::Cancelled;
            }
            if state.iterations >= self.max_iterations {
                warn!(
                    session_id = %run.session_id,
                    iterations = state.iterations,
                    "Iteration cap reached"
                );
                state
                    .emit(AgentStreamEvent::notice(format!(
                        "\n\n**Stopped after {} iterations.** Ask again to continue.\n\n",
                        state.iterations
                    )))
                    .await;
                return RunOutcome::Stopped;
            }
            state.iterations += 1;
            state.transcript.truncate();

            debug!(
                session_id = %run.session_id,
                iteration = state.iterations,
                messages = state.transcript.len(),
                estimated_tokens = state.transcript.estimated_tokens(),
                "Agent loop iteration"
            );

            let request =
                ProviderRequest::new(run.model.clone(), state.transcript.messages().to_vec())
                    .with_tools(catalog.to_vec());

            let mut stream = match self.provider.stream(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    return self
                        .abort(run, state, format!("Model server connection failed: {e}"))
                        .await;
                }
            };

            let mut decoder = DeltaDecoder::new();
            while let Some(item) = stream.recv().await {
                match item {
                    Ok(event) => {
                        for fragment in decoder.feed(event) {
                            state.emit_fragment(fragment).await;
                        }
                    }
                    Err(e) => {
                        return self.abort(run, state, format!("Streaming error: {e}")).await;
                    }
                }
            }
            let (turn, trailing) = decoder.finish();
            for fragment in trailing {
                state.emit_fragment(fragment).await;
            }

            if turn.tool_calls.is_empty() {
                debug!(
                    session_id = %run.session_id,
                    finish_reason = ?turn.finish_reason,
                    "Model answered without tool calls"
                );
                return RunOutcome::Stopped;
            }

            state.transcript.push(Message::assistant_with_tool_calls(
                turn.content,
                turn.tool_calls.clone(),
            ));

            for (i, call) in turn.tool_calls.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(self.tool_pause).await;
                }
                if guard.is_cancelled() {
                    break;
                }
                self.dispatch(run, call, state).await;
            }
        }
    }

    async fn dispatch(&self, run: &AgentRun, call: &MessageToolCall, state: &mut RunState) {
        let arguments = self.prepare_arguments(run, call);
        state.emit(AgentStreamEvent::tool_start(&call.name)).await;

        if call.name == PUSH_TOOL {
            let devices = push_targets(&arguments);
            let vetoed = state.retry.vetoed(&devices);
            if !vetoed.is_empty() {
                let message = state.retry.veto_message(&vetoed);
                warn!(session_id = %run.session_id, devices = ?vetoed, "Configuration push vetoed");
                self.publish(DomainEvent::PushVetoed {
                    session_id: run.session_id.to_string(),
                    devices: vetoed.iter().map(|d| d.to_string()).collect(),
                    timestamp: Utc::now(),
                });
                state
                    .emit(AgentStreamEvent::notice(format!("\n\n**Push refused**: {message}\n\n")))
                    .await;
                state.emit(AgentStreamEvent::tool_end(&call.name, false)).await;
                state
                    .transcript
                    .push(Message::tool_result(&call.id, &call.name, message));
                return;
            }
        }

        let started = Instant::now();
        let outcome = self
            .tools
            .call_tool(&call.name, arguments.clone(), self.tool_timeout)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;
        state.tool_calls_made += 1;

        let push_failures = if call.name == PUSH_TOOL {
            state.retry.record_push(&push_targets(&arguments), &outcome)
        } else {
            Vec::new()
        };
        let reported = matches!(outcome, ToolOutcome::Ok(_));

        let (text, mut success) = match outcome {
            ToolOutcome::Ok(text) if text.is_empty() => (EMPTY_RESULT.to_string(), true),
            ToolOutcome::Ok(text) => (text, true),
            ToolOutcome::TimedOut => (
                format!(
                    "Error: Tool '{}' timed out after {} seconds",
                    call.name,
                    self.tool_timeout.as_secs()
                ),
                false,
            ),
            ToolOutcome::Failed(reason) => (format!("Error: {reason}"), false),
        };
        // A completed push report can still name failed devices
        if !push_failures.is_empty() {
            success = false;
        }

        debug!(
            session_id = %run.session_id,
            tool = %call.name,
            success,
            duration_ms,
            "Tool executed"
        );
        self.publish(DomainEvent::ToolExecuted {
            session_id: run.session_id.to_string(),
            tool_name: call.name.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });

        if call.name == PUSH_TOOL && reported {
            let heading = if success {
                "**Push result**".to_string()
            } else {
                format!("**Push failed** for {}", push_failures.join(", "))
            };
            state
                .emit(AgentStreamEvent::notice(format!("\n\n{heading}\n\n{text}\n\n")))
                .await;
        } else if !success {
            state
                .emit(AgentStreamEvent::notice(format!("\n\n**Tool error**: {text}\n\n")))
                .await;
        }
        state.emit(AgentStreamEvent::tool_end(&call.name, success)).await;
        state
            .transcript
            .push(Message::tool_result(&call.id, &call.name, text));
    }

    /// Decode the model's argument text and add the injected parameters.
    fn prepare_arguments(&self, run: &AgentRun, call: &MessageToolCall) -> Value {
        let mut arguments = match serde_json::from_str::<Value>(&call.arguments) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                if !call.arguments.trim().is_empty() {
                    debug!(tool = %call.name, "Tool arguments are not a JSON object, using {{}}");
                }
                serde_json::Map::new()
            }
        };
        arguments.insert("topology_id".into(), Value::String(run.topology_id.clone()));
        if call.name == KNOWLEDGE_TOOL {
            arguments.insert("model_name".into(), Value::String(run.model.clone()));
        }
        Value::Object(arguments)
    }

    async fn abort(&self, run: &AgentRun, state: &mut RunState, message: String) -> RunOutcome {
        warn!(session_id = %run.session_id, error = %message, "Agent run aborted");
        self.publish(DomainEvent::ErrorOccurred {
            context: format!("agent run {}", run.session_id),
            error_message: message.clone(),
            timestamp: Utc::now(),
        });
        state
            .emit(AgentStreamEvent::error(format!("\n\n**Error**: {message}\n\n")))
            .await;
        RunOutcome::Aborted
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Per-run mutable state, owned by the running task.
struct RunState {
    tx: mpsc::Sender<AgentStreamEvent>,
    streamed: String,
    transcript: Transcript,
    retry: RetryLimiter,
    iterations: usize,
    tool_calls_made: usize,
}

impl RunState {
    async fn emit(&mut self, event: AgentStreamEvent) {
        self.streamed.push_str(event.text());
        // A closed receiver only means nobody is watching; the run goes on.
        let _ = self.tx.send(event).await;
    }

    async fn emit_fragment(&mut self, fragment: Fragment) {
        let event = match fragment {
            Fragment::Content(text) => AgentStreamEvent::Chunk { text },
            Fragment::Reasoning(text) => AgentStreamEvent::Reasoning { text },
        };
        self.emit(event).await;
    }
}
