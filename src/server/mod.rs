//! HTTP backend for dashboards.
//!
//! JSON endpoints over one shared [`Orchestrator`] plus a server-sent
//! event stream of [`AgentEvent`](crate::agent::AgentEvent)s.
//!
//! | Method | Path              | Body / response                     |
//! |--------|-------------------|-------------------------------------|
//! | GET    | `/health`         | status, version, busy               |
//! | POST   | `/api/chat`       | `{message}` → `{response}`          |
//! | GET    | `/api/history`    | visible turns                       |
//! | DELETE | `/api/history`    | 204, or 409 while a turn runs       |
//! | POST   | `/api/compare`    | `{message, providers?}` → answers   |
//! | GET    | `/api/costs`      | cost summary and records            |
//! | GET    | `/api/providers`  | provider statuses                   |
//! | GET    | `/api/tools`      | tool definitions                    |
//! | GET    | `/api/events`     | SSE stream                          |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, instrument};

use crate::agent::Orchestrator;

/// Shared handler state.
#[derive(Clone)]
struct AppState {
    agent: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CompareBody {
    message: String,
    #[serde(default)]
    providers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatReply {
    response: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "busy": state.agent.is_busy(),
    }))
}

#[instrument(skip_all)]
async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    if body.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message cannot be empty");
    }
    let response = state.agent.chat(&body.message).await;
    Json(ChatReply { response }).into_response()
}

async fn compare(State(state): State<AppState>, Json(body): Json<CompareBody>) -> Response {
    if body.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message cannot be empty");
    }
    Json(state.agent.compare(&body.message, &body.providers).await).into_response()
}

async fn history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.agent.history())
}

async fn clear_history(State(state): State<AppState>) -> Response {
    if state.agent.is_busy() {
        return error_response(StatusCode::CONFLICT, "a turn is in progress");
    }
    state.agent.clear_history();
    StatusCode::NO_CONTENT.into_response()
}

async fn costs(State(state): State<AppState>) -> impl IntoResponse {
    let ledger = state.agent.router().ledger();
    Json(json!({
        "summary": ledger.summary(),
        "records": ledger.records(),
    }))
}

async fn providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.agent.router().provider_statuses())
}

async fn tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.agent.tools().definitions())
}

async fn events(State(state): State<AppState>) -> Response {
    let stream = BroadcastStream::new(state.agent.subscribe()).map(|result| match result {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok::<_, Infallible>(Event::default().event(event.kind()).data(data))
        }
        Err(_) => Ok(Event::default()
            .event("error")
            .data(r#"{"type":"error","message":"event stream lagged"}"#)),
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Builds the application router.
pub fn app(agent: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/compare", post(compare))
        .route("/api/history", get(history).delete(clear_history))
        .route("/api/costs", get(costs))
        .route("/api/providers", get(providers))
        .route("/api/tools", get(tools))
        .route("/api/events", get(events))
        .with_state(AppState { agent })
}

/// Serves the backend on `addr` until Ctrl-C.
///
/// # Errors
///
/// Returns an I/O error if the address cannot be bound.
pub async fn serve(agent: Arc<Orchestrator>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "dashboard backend listening");
    axum::serve(listener, app(agent))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
