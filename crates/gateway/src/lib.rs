//! HTTP API gateway for Dispatch.
//!
//! Exposes the chat endpoints of each topology (agent runs and
//! retrieval-only answers streamed over SSE), session management, the
//! cancellation endpoint, the tool catalog and a domain event stream.
//!
//! Built on Axum.

pub mod chat;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::{get, post},
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::info;

use dispatch_agent::CancellationRegistry;
use dispatch_agent::schema::adapt_catalog;
use dispatch_core::event::EventBus;
use dispatch_core::knowledge::KnowledgeSource;
use dispatch_core::network::DeviceInventory;
use dispatch_core::store::ChatStore;
use dispatch_core::tool::{ToolDefinition, ToolInvoker};
use dispatch_providers::ProviderRouter;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: dispatch_config::AppConfig,
    pub providers: ProviderRouter,
    pub tools: Arc<dyn ToolInvoker>,
    pub knowledge: Arc<dyn KnowledgeSource>,
    pub inventory: Arc<dyn DeviceInventory>,
    pub store: Arc<dyn ChatStore>,
    pub cancellations: Arc<CancellationRegistry>,
    pub event_bus: Arc<EventBus>,
}

pub type SharedState = Arc<GatewayState>;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tools", get(list_tools_handler))
        .route("/events", get(event_stream_handler))
        .route("/topologies/{topology_id}/chat", get(chat::list_sessions_handler))
        .route(
            "/topologies/{topology_id}/chat/{session_id}",
            axum::routing::put(chat::rename_session_handler).delete(chat::delete_session_handler),
        )
        .route(
            "/topologies/{topology_id}/chat/{session_id}/history",
            get(chat::history_handler),
        )
        .route(
            "/topologies/{topology_id}/chat/{session_id}/agent",
            post(chat::agent_handler),
        )
        .route(
            "/topologies/{topology_id}/chat/{session_id}/ask",
            post(chat::ask_handler),
        )
        .route(
            "/topologies/{topology_id}/chat/{session_id}/local",
            post(chat::local_handler),
        )
        .route(
            "/topologies/{topology_id}/chat/{session_id}/stop",
            post(chat::stop_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Assemble the gateway state from configuration.
///
/// The simulated lab stands in for both the device inventory and the
/// configuration executor.
pub async fn build_state(
    config: dispatch_config::AppConfig,
) -> dispatch_core::Result<SharedState> {
    let providers = dispatch_providers::build_from_config(&config);
    let knowledge: Arc<dyn KnowledgeSource> =
        Arc::new(dispatch_providers::knowledge_from_config(&config));
    let lab = Arc::new(dispatch_tools::SimulatedLab::from_config(&config.lab));
    let tools: Arc<dyn ToolInvoker> = Arc::new(dispatch_tools::default_registry(
        lab.clone(),
        lab.clone(),
        knowledge.clone(),
    ));
    let store = dispatch_store::open(&config.store).await?;

    info!(
        models = ?providers.list(),
        store = store.name(),
        "Gateway state ready"
    );

    Ok(Arc::new(GatewayState {
        config,
        providers,
        tools,
        knowledge,
        inventory: lab,
        store,
        cancellations: Arc::new(CancellationRegistry::new()),
        event_bus: Arc::new(EventBus::default()),
    }))
}

/// Start the gateway HTTP server.
pub async fn start(config: dispatch_config::AppConfig) -> dispatch_core::Result<()> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(config).await?;
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDefinition>,
    pub count: usize,
}

/// `GET /tools` — the catalog exactly as the model sees it.
async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools = adapt_catalog(&state.tools.list_tools().await);
    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}

/// `GET /events` — SSE stream of domain events (runs, tool calls, vetoes).
async fn event_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.name()).data(data))
        });

    Sse::new(stream)
}
