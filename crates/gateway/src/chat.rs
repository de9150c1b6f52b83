//! Topology chat endpoints.
//!
//! - `GET    /topologies/{t}/chat`               — sessions of a topology
//! - `PUT    /topologies/{t}/chat/{s}`           — rename a session
//! - `DELETE /topologies/{t}/chat/{s}`           — delete a session
//! - `GET    /topologies/{t}/chat/{s}/history`   — messages of a session
//! - `POST   /topologies/{t}/chat/{s}/agent`     — agent run, SSE
//! - `POST   /topologies/{t}/chat/{s}/ask`       — retrieval answer (mix), SSE
//! - `POST   /topologies/{t}/chat/{s}/local`     — retrieval answer (local), SSE
//! - `POST   /topologies/{t}/chat/{s}/stop`      — cancel the running agent
//!
//! A session id of `new` creates a session titled after the message.
//! Streaming responses carry the effective session id in `X-Session-ID`.

use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{ApiError, SharedState, api_error};
use dispatch_agent::{AgentLoop, AgentRun, AgentStreamEvent};
use dispatch_core::error::StoreError;
use dispatch_core::knowledge::{AnswerRequest, RetrievalMode};
use dispatch_core::message::{Role, SessionId};
use dispatch_core::provider::Provider;
use dispatch_core::store::{ChatMode, ChatSession, StoredMessage, session_title};

pub const SESSION_HEADER: &str = "x-session-id";
const NEW_SESSION: &str = "new";
/// Question/answer pairs of context given to retrieval answers.
const ASK_HISTORY_PAIRS: usize = 2;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    /// Model selector; the configured default when omitted
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub session_id: String,
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::SessionNotFound(id) => {
            api_error(StatusCode::NOT_FOUND, format!("Session not found: {id}"))
        }
        other => {
            warn!(error = %other, "Chat store failure");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ── Session management ────────────────────────────────────────────────────

pub async fn list_sessions_handler(
    State(state): State<SharedState>,
    Path(topology_id): Path<String>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    let sessions = state
        .store
        .list_sessions(&topology_id)
        .await
        .map_err(store_error)?;
    Ok(Json(sessions))
}

pub async fn rename_session_handler(
    State(state): State<SharedState>,
    Path((_topology_id, session_id)): Path<(String, String)>,
    Json(payload): Json<RenameRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let renamed = state
        .store
        .rename_session(&SessionId::from(&session_id), &payload.title)
        .await
        .map_err(store_error)?;
    if !renamed {
        return Err(api_error(StatusCode::NOT_FOUND, "Session not found"));
    }
    Ok(Json(StatusResponse {
        status: "renamed".into(),
        session_id,
    }))
}

pub async fn delete_session_handler(
    State(state): State<SharedState>,
    Path((_topology_id, session_id)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let deleted = state
        .store
        .delete_session(&SessionId::from(&session_id))
        .await
        .map_err(store_error)?;
    if !deleted {
        return Err(api_error(StatusCode::NOT_FOUND, "Session not found"));
    }
    Ok(Json(StatusResponse {
        status: "deleted".into(),
        session_id,
    }))
}

pub async fn history_handler(
    State(state): State<SharedState>,
    Path((topology_id, session_id)): Path<(String, String)>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    state
        .store
        .session_history(&SessionId::from(&session_id), &topology_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "Chat session not found in this topology",
            )
        })
}

/// `POST .../stop` — flag the running agent of a session for cancellation.
pub async fn stop_handler(
    State(state): State<SharedState>,
    Path((_topology_id, session_id)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    if !state.cancellations.cancel(&SessionId::from(&session_id)) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "No active agent task for this session",
        ));
    }
    info!(session_id = %session_id, "Agent stop requested");
    Ok(Json(StatusResponse {
        status: "stopped".into(),
        session_id,
    }))
}

// ── Streaming chat ────────────────────────────────────────────────────────

/// Model selector and its provider, or 400 for an unknown model.
fn resolve_model(
    state: &SharedState,
    requested: Option<&str>,
) -> Result<(String, Arc<dyn Provider>), ApiError> {
    let model = requested.unwrap_or(&state.config.default_model).to_string();
    match state.providers.get(&model) {
        Some(provider) => Ok((model, provider)),
        None => Err(api_error(
            StatusCode::BAD_REQUEST,
            format!(
                "Unknown model '{model}'. Available: {}",
                state.providers.list().join(", ")
            ),
        )),
    }
}

/// The session to talk in, creating it for `new`.
async fn resolve_session(
    state: &SharedState,
    topology_id: &str,
    session_id: &str,
    content: &str,
    mode: ChatMode,
    model: &str,
) -> Result<SessionId, ApiError> {
    if session_id != NEW_SESSION {
        return Ok(SessionId::from(session_id));
    }

    let exists = state
        .inventory
        .topology_exists(topology_id)
        .await
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e.to_string()))?;
    if !exists {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Topology not found: {topology_id}"),
        ));
    }

    let session = state
        .store
        .create_session(topology_id, &session_title(content), mode, model)
        .await
        .map_err(store_error)?;
    info!(session_id = %session.id, topology_id, mode = mode.as_str(), "Chat session created");
    Ok(session.id)
}

/// Wrap an event channel as an SSE response carrying `X-Session-ID`.
fn sse_response(
    session_id: &SessionId,
    rx: mpsc::Receiver<AgentStreamEvent>,
) -> Result<Response, ApiError> {
    let header = HeaderValue::from_str(session_id.as_str())
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid session id"))?;

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().data(data))
    });

    Ok((
        [(HeaderName::from_static(SESSION_HEADER), header)],
        Sse::new(stream),
    )
        .into_response())
}

/// `POST .../agent` — run the network automation agent.
pub async fn agent_handler(
    State(state): State<SharedState>,
    Path((topology_id, session_id)): Path<(String, String)>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let (model, provider) = resolve_model(&state, payload.model.as_deref())?;
    let session_id = resolve_session(
        &state,
        &topology_id,
        &session_id,
        &payload.content,
        ChatMode::Agent,
        &model,
    )
    .await?;

    let history = state
        .store
        .load_recent_history(&session_id, Some(state.config.agent.history_pairs))
        .await
        .map_err(store_error)?;
    state
        .store
        .save_message(&session_id, Role::User, &payload.content)
        .await
        .map_err(store_error)?;

    info!(
        session_id = %session_id,
        topology_id = %topology_id,
        model = %model,
        history = history.len(),
        "Agent chat request"
    );

    let agent = AgentLoop::new(provider, state.tools.clone(), state.cancellations.clone())
        .with_config(&state.config.agent)
        .with_event_bus(state.event_bus.clone());
    let run = AgentRun {
        session_id: session_id.clone(),
        topology_id,
        model,
        user_query: payload.content,
        history,
    };

    let (tx, rx) = mpsc::channel(128);
    let store = state.store.clone();
    let run_session = session_id.clone();
    tokio::spawn(async move {
        let report = agent.run(run, tx.clone()).await;
        if let Some(reply) = report.reply.filter(|r| !r.is_empty()) {
            if let Err(e) = store.save_message(&run_session, Role::Assistant, &reply).await {
                warn!(session_id = %run_session, error = %e, "Failed to save agent reply");
            }
        }
        // The stream closes only once the reply is stored.
        drop(tx);
    });

    sse_response(&session_id, rx)
}

/// `POST .../ask` — retrieval-augmented answer over the whole knowledge graph.
pub async fn ask_handler(
    state: State<SharedState>,
    path: Path<(String, String)>,
    payload: Json<ChatRequest>,
) -> Result<Response, ApiError> {
    answer(state, path, payload, ChatMode::Ask, RetrievalMode::Mix).await
}

/// `POST .../local` — retrieval-augmented answer from local entities only.
pub async fn local_handler(
    state: State<SharedState>,
    path: Path<(String, String)>,
    payload: Json<ChatRequest>,
) -> Result<Response, ApiError> {
    answer(state, path, payload, ChatMode::Local, RetrievalMode::Local).await
}

async fn answer(
    State(state): State<SharedState>,
    Path((topology_id, session_id)): Path<(String, String)>,
    Json(payload): Json<ChatRequest>,
    chat_mode: ChatMode,
    retrieval: RetrievalMode,
) -> Result<Response, ApiError> {
    let (model, _) = resolve_model(&state, payload.model.as_deref())?;
    let session_id = resolve_session(
        &state,
        &topology_id,
        &session_id,
        &payload.content,
        chat_mode,
        &model,
    )
    .await?;

    let history = state
        .store
        .load_recent_history(&session_id, Some(ASK_HISTORY_PAIRS))
        .await
        .map_err(store_error)?;
    state
        .store
        .save_message(&session_id, Role::User, &payload.content)
        .await
        .map_err(store_error)?;

    info!(
        session_id = %session_id,
        mode = retrieval.as_str(),
        model = %model,
        "Retrieval chat request"
    );

    let request = AnswerRequest {
        query: payload.content,
        model,
        mode: retrieval,
        history,
    };

    let (tx, rx) = mpsc::channel(128);
    let knowledge = state.knowledge.clone();
    let store = state.store.clone();
    let answer_session = session_id.clone();
    tokio::spawn(async move {
        let mut answer = String::new();
        match knowledge.stream_answer(request).await {
            Ok(mut fragments) => {
                while let Some(fragment) = fragments.recv().await {
                    match fragment {
                        Ok(text) => {
                            answer.push_str(&text);
                            let _ = tx.send(AgentStreamEvent::chunk(text)).await;
                        }
                        Err(e) => {
                            let message = format!("Knowledge service error: {e}");
                            let _ = tx.send(AgentStreamEvent::error(message)).await;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                let _ = tx
                    .send(AgentStreamEvent::error(format!("Knowledge service error: {e}")))
                    .await;
            }
        }

        if !answer.is_empty() {
            if let Err(e) = store
                .save_message(&answer_session, Role::Assistant, &answer)
                .await
            {
                warn!(session_id = %answer_session, error = %e, "Failed to save answer");
            }
        }
        drop(tx);
    });

    sse_response(&session_id, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use crate::test_support::{DownProvider, state_with, test_state};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// The JSON payloads of every `data:` line.
    async fn sse_events(response: Response) -> Vec<serde_json::Value> {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        text.split("\n\n")
            .filter_map(|frame| frame.trim().strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn agent_on_new_session_streams_and_persists() {
        let state = test_state().await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/topologies/lab/chat/new/agent",
                serde_json::json!({"content": "check interfaces on R1", "model": "qwen"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();

        let events = sse_events(response).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "chunk");
        assert_eq!(events[0]["text"], "Interfaces look healthy.");

        let sessions = state.store.list_sessions("lab").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id.as_str(), session_id);
        assert_eq!(sessions[0].title, "check interfaces on R1");
        assert_eq!(sessions[0].mode, ChatMode::Agent);

        let history = state
            .store
            .session_history(&SessionId::from(&session_id), "lab")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Interfaces look healthy.");
    }

    #[tokio::test]
    async fn new_session_on_unknown_topology_is_404() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(post_json(
                "/topologies/nowhere/chat/new/agent",
                serde_json::json!({"content": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_model_is_400() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(post_json(
                "/topologies/lab/chat/new/agent",
                serde_json::json!({"content": "hi", "model": "llama"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_existing_session_is_404() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(post_json(
                "/topologies/lab/chat/missing/agent",
                serde_json::json!({"content": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn aborted_run_keeps_only_user_message() {
        let state = state_with(Arc::new(DownProvider)).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/topologies/lab/chat/new/agent",
                serde_json::json!({"content": "push ospf"}),
            ))
            .await
            .unwrap();
        let session_id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        let events = sse_events(response).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");

        let history = state
            .store
            .session_history(&SessionId::from(&session_id), "lab")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn stop_without_active_run_is_404() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(post_json("/topologies/lab/chat/s1/stop", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_flags_active_run() {
        let state = test_state().await;
        let guard = state.cancellations.register(&SessionId::from("s1"));
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json("/topologies/lab/chat/s1/stop", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.status, "stopped");
        assert_eq!(status.session_id, "s1");
        assert!(guard.is_cancelled());
    }

    #[tokio::test]
    async fn ask_streams_knowledge_answer() {
        let state = test_state().await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/topologies/lab/chat/new/local",
                serde_json::json!({"content": "what is OSPF"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        let events = sse_events(response).await;
        let text: String = events.iter().map(|e| e["text"].as_str().unwrap()).collect();
        assert_eq!(text, "[local] answer to what is OSPF");

        let sessions = state.store.list_sessions("lab").await.unwrap();
        assert_eq!(sessions[0].mode, ChatMode::Local);
        let history = state
            .store
            .session_history(&SessionId::from(&session_id), "lab")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(history[1].content, "[local] answer to what is OSPF");
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let state = test_state().await;
        let session = state
            .store
            .create_session("lab", "first", ChatMode::Agent, "qwen")
            .await
            .unwrap();
        let id = session.id.as_str().to_string();

        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/topologies/lab/chat/{id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title":"renamed"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/topologies/lab/chat")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let sessions: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(sessions[0]["title"], "renamed");

        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/topologies/core/chat/{id}/history"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/topologies/lab/chat/{id}"))
                .body(Body::empty())
                .unwrap()
        };
        let response = build_router(state.clone()).oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = build_router(state).oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
