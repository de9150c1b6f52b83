//! End-to-end integration tests for the Dispatch agent.
//!
//! These tests run the real tool registry against the simulated lab, with a
//! scripted model in place of the completion server, and drive the HTTP
//! gateway the way a browser client would.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use dispatch_agent::{AgentLoop, AgentRun, AgentStreamEvent, CancellationRegistry, RunOutcome};
use dispatch_config::AppConfig;
use dispatch_core::error::ProviderError;
use dispatch_core::event::EventBus;
use dispatch_core::knowledge::KnowledgeSource;
use dispatch_core::message::{Role, SessionId};
use dispatch_core::network::{ConfigExecutor, Device};
use dispatch_core::provider::{
    FinishReason, Provider, ProviderRequest, StreamEvent, StreamReceiver, ToolCallDelta,
};
use dispatch_core::tool::ToolInvoker;
use dispatch_gateway::{GatewayState, build_router};
use dispatch_providers::ProviderRouter;
use dispatch_store::InMemoryStore;
use dispatch_tools::{SimulatedLab, default_registry};
use tokio::sync::mpsc;

// ── Scripted model ───────────────────────────────────────────────────────

type Turn = Vec<StreamEvent>;

/// Plays back one scripted turn per completion call.
struct ScriptedModel {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedModel {
    fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedModel {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<StreamReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedModel exhausted");
        let (tx, rx) = mpsc::channel(turn.len().max(1));
        for event in turn {
            tx.try_send(Ok(event)).unwrap();
        }
        Ok(rx)
    }
}

fn say(text: &str) -> Turn {
    vec![
        StreamEvent::ReasoningDelta("Checking the knowledge base first.".into()),
        StreamEvent::TextDelta(text.into()),
        StreamEvent::Finish(FinishReason::Stop),
    ]
}

fn call(tools: &[(&str, serde_json::Value)]) -> Turn {
    let mut turn: Turn = tools
        .iter()
        .enumerate()
        .map(|(i, (name, args))| {
            StreamEvent::ToolCallDelta(ToolCallDelta {
                index: i as u32,
                id: Some(format!("call_{i}")),
                name: Some(name.to_string()),
                arguments: Some(args.to_string()),
            })
        })
        .collect();
    turn.push(StreamEvent::Finish(FinishReason::ToolCalls));
    turn
}

fn push_r1(commands: &[&str], parent: &str) -> Turn {
    call(&[(
        "push_configuration",
        serde_json::json!({
            "device_configs": [{"device_name": "R1", "commands": commands, "parent": parent}]
        }),
    )])
}

// ── Knowledge stub ───────────────────────────────────────────────────────

struct Docs;

#[async_trait::async_trait]
impl KnowledgeSource for Docs {
    fn name(&self) -> &str {
        "docs"
    }

    async fn query(&self, text: &str, model: &str) -> String {
        format!(
            "[{model}] To configure {text}: \
             router ospf <pid>, network <net> <wildcard> area <a>"
        )
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

async fn lab() -> Arc<SimulatedLab> {
    let lab = SimulatedLab::new();
    for (name, port) in [("R1", 5000), ("R2", 5001)] {
        lab.add_device(
            "lab",
            Device {
                name: name.into(),
                device_type: Some("router".into()),
                port: Some(port),
                ip_address: None,
            },
            &format!(
                "hostname {name}\ninterface Gi0/0\n ip address 10.0.0.1 255.255.255.0\n!\nend"
            ),
        )
        .await;
    }
    Arc::new(lab)
}

fn tools(lab: &Arc<SimulatedLab>) -> Arc<dyn ToolInvoker> {
    Arc::new(default_registry(lab.clone(), lab.clone(), Arc::new(Docs)))
}

fn agent_run(query: &str) -> AgentRun {
    AgentRun {
        session_id: SessionId::from("e2e"),
        topology_id: "lab".into(),
        model: "qwen".into(),
        user_query: query.into(),
        history: Vec::new(),
    }
}

async fn run_agent(
    agent: AgentLoop,
    run: AgentRun,
) -> (dispatch_agent::AgentReport, Vec<AgentStreamEvent>) {
    let (tx, mut rx) = mpsc::channel(1024);
    let report = agent.run(run, tx).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (report, events)
}

// ── E2E: agent against the simulated lab ─────────────────────────────────

#[tokio::test]
async fn e2e_knowledge_first_then_push_changes_running_config() {
    let lab = lab().await;
    let model = Arc::new(ScriptedModel::new(vec![
        call(&[
            ("fetch_related_knowledge", serde_json::json!({"query": "OSPF"})),
            ("fetch_live_config", serde_json::json!({"device_name": "R1"})),
        ]),
        push_r1(&["network 10.0.0.0 0.0.0.255 area 0"], "router ospf 1"),
        say("OSPF area 0 is now enabled on R1."),
    ]));
    let agent = AgentLoop::new(model.clone(), tools(&lab), Arc::new(CancellationRegistry::new()));

    let (report, events) = run_agent(agent, agent_run("Enable OSPF area 0 on R1")).await;

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.tool_calls_made, 3);
    assert_eq!(model.calls(), 3);

    let config = lab.fetch_config("lab", "R1").await.unwrap();
    assert!(config.contains("router ospf 1\n network 10.0.0.0 0.0.0.255 area 0\nend"));

    // The knowledge lookup saw the injected model name.
    let tool_results: Vec<_> = report
        .transcript
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert!(tool_results[0].content.starts_with("[qwen] To configure OSPF"));
    assert!(tool_results[1].content.contains("hostname R1"));
    assert!(tool_results[2].content.starts_with("Device R1: success"));

    let streamed: String = events.iter().map(|e| e.text()).collect();
    assert!(streamed.contains("<think>Checking the knowledge base first.</think> "));
    assert!(streamed.ends_with("OSPF area 0 is now enabled on R1."));
}

#[tokio::test]
async fn e2e_unreachable_device_is_vetoed_after_two_failures() {
    let lab = lab().await;
    lab.set_unreachable("lab", "R1", true).await.unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        push_r1(&["ip routing"], ""),
        push_r1(&["ip routing"], ""),
        push_r1(&["ip routing"], ""),
        say("R1 cannot be reached; please check connectivity."),
    ]));
    let bus = Arc::new(EventBus::default());
    let mut events_rx = bus.subscribe();
    let agent = AgentLoop::new(model, tools(&lab), Arc::new(CancellationRegistry::new()))
        .with_event_bus(bus);

    let (report, _) = run_agent(agent, agent_run("Enable routing on R1")).await;

    assert_eq!(report.outcome, RunOutcome::Stopped);
    let results: Vec<_> = report
        .transcript
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].contains("Device R1 is unreachable"));
    assert!(results[1].contains("Device R1 is unreachable"));
    assert!(results[2].contains("maximum retry limit (2)"));
    // Only the two real attempts were executed.
    assert_eq!(report.tool_calls_made, 2);

    let mut vetoes = 0;
    while let Ok(event) = events_rx.try_recv() {
        if event.name() == "push_vetoed" {
            vetoes += 1;
        }
    }
    assert_eq!(vetoes, 1);
}

#[tokio::test]
async fn e2e_unknown_device_error_is_fed_back_to_model() {
    let lab = lab().await;
    let model = Arc::new(ScriptedModel::new(vec![
        call(&[("fetch_live_config", serde_json::json!({"device_name": "R9"}))]),
        say("There is no R9 in this topology."),
    ]));
    let agent = AgentLoop::new(model, tools(&lab), Arc::new(CancellationRegistry::new()));

    let (report, events) = run_agent(agent, agent_run("Show R9")).await;

    assert_eq!(report.outcome, RunOutcome::Stopped);
    let result = report
        .transcript
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(result.content.starts_with("Error:"));
    assert!(result.content.contains("R9"));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, AgentStreamEvent::ToolEnd { success: false, .. }))
    );
}

// ── E2E: HTTP gateway ────────────────────────────────────────────────────

async fn gateway(model: Arc<ScriptedModel>) -> (Arc<GatewayState>, Arc<SimulatedLab>) {
    let lab = lab().await;
    let mut providers = ProviderRouter::new("qwen");
    providers.register("qwen", model);
    let mut config = AppConfig::default();
    config.agent.tool_pause_ms = 1;

    let state = Arc::new(GatewayState {
        config,
        providers,
        tools: tools(&lab),
        knowledge: Arc::new(Docs),
        inventory: lab.clone(),
        store: Arc::new(InMemoryStore::new()),
        cancellations: Arc::new(CancellationRegistry::new()),
        event_bus: Arc::new(EventBus::default()),
    });
    (state, lab)
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn sse_texts(response: axum::response::Response) -> Vec<serde_json::Value> {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec())
        .unwrap()
        .split("\n\n")
        .filter_map(|frame| frame.trim().strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn e2e_http_agent_session_round_trip() {
    let model = Arc::new(ScriptedModel::new(vec![
        call(&[("list_devices", serde_json::json!({}))]),
        say("The lab has R1 and R2."),
        say("R2 is a router on port 5001."),
    ]));
    let (state, _lab) = gateway(model.clone()).await;

    // First turn creates the session.
    let response = build_router(state.clone())
        .oneshot(post(
            "/topologies/lab/chat/new/agent",
            serde_json::json!({"content": "Which devices are in the lab?", "model": "qwen"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response.headers()["x-session-id"].to_str().unwrap().to_string();
    let events = sse_texts(response).await;
    assert!(events.iter().all(|e| e["text"].is_string()));
    assert!(events.iter().any(|e| e["type"] == "tool_start"));

    // Second turn reuses it and sees the first exchange as history.
    let response = build_router(state.clone())
        .oneshot(post(
            &format!("/topologies/lab/chat/{session_id}/agent"),
            serde_json::json!({"content": "What about R2?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.headers()["x-session-id"], session_id.as_str());
    sse_texts(response).await;

    let requests = model.requests.lock().unwrap().clone();
    let third = &requests[2];
    let contents: Vec<&str> = third.messages.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"Which devices are in the lab?"));
    assert_eq!(*contents.last().unwrap(), "What about R2?");

    let response = build_router(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/topologies/lab/chat/{session_id}/history"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let history: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    let roles: Vec<&str> = history.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);
    assert!(history[3]["content"].as_str().unwrap().ends_with("R2 is a router on port 5001."));

    // Nothing is running any more.
    let response = build_router(state)
        .oneshot(post(
            &format!("/topologies/lab/chat/{session_id}/stop"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
