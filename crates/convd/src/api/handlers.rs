//! HTTP handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing::{info, instrument, warn};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::engine::AgentEvent;
use crate::session::CreateSession;

/// Synthetic stream item emitted after a turn's result event.
const DONE_EVENT: &str = r#"{"type":"done"}"#;

// ============================================================================
// Health
// ============================================================================

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Data directories the agent may read.
    pub directories: Vec<String>,
    /// Optional API key for this session.
    pub api_key: Option<String>,
    /// Optional model override.
    pub model: Option<String>,
    /// Optional human label for the workspace and default title.
    pub label: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub title: String,
    pub work_dir: String,
    pub auth_mode: String,
}

/// Create a session and start its worker.
#[instrument(skip(state, request))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<CreateSessionResponse>> {
    if request.directories.is_empty() {
        return Err(ApiError::bad_request("at least one data directory is required"));
    }
    for dir in &request.directories {
        let is_dir = tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(ApiError::bad_request(format!(
                "data directory does not exist: {}",
                dir
            )));
        }
    }

    let params = CreateSession {
        directories: request.directories,
        api_key: request.api_key,
        model: request.model,
        label: request.label,
    };

    let (handle, record) = state.registry.create(params).await?;

    info!(session_id = %handle.session_id, "Created session");
    Ok(Json(CreateSessionResponse {
        session_id: handle.session_id.clone(),
        title: record.title,
        work_dir: handle.work_dir.display().to_string(),
        auth_mode: handle.auth_mode.to_string(),
    }))
}

/// List persisted sessions, most recently updated first.
#[instrument(skip(state))]
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sessions = state.store.list_sessions().await?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// Get a session: live state if the worker is running, otherwise the
/// persisted history.
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if let Some(handle) = state.registry.get(&session_id).await {
        return Ok(Json(json!({
            "session_id": handle.session_id,
            "live": true,
            "connected": handle.is_connected(),
            "status": handle.status().await,
            "auth_mode": handle.auth_mode,
            "directories": handle.directories,
        })));
    }

    match state.store.get_history(&session_id).await? {
        Some(record) => Ok(Json(json!({
            "session_id": record.session_id,
            "live": false,
            "title": record.title,
            "directories": record.directories,
            "created_at": record.created_at,
            "updated_at": record.updated_at,
            "messages": record.messages,
        }))),
        None => Err(ApiError::not_found(format!("session not found: {}", session_id))),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteSessionQuery {
    #[serde(default)]
    pub delete_history: bool,
}

/// Stop a session and optionally erase its history.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<DeleteSessionQuery>,
) -> ApiResult<Json<Value>> {
    let was_live = state.registry.remove(&session_id).await;

    let had_history = if query.delete_history {
        state.store.delete_record(&session_id).await?
    } else {
        state.store.get_history(&session_id).await?.is_some()
    };

    // A persisted-only session still exists, so deleting just the worker
    // of one succeeds and stays repeatable; only a session with neither a
    // worker nor a record is a 404.
    if !was_live && !had_history {
        return Err(ApiError::not_found(format!("session not found: {}", session_id)));
    }

    info!(session_id = %session_id, delete_history = query.delete_history, "Deleted session");
    Ok(Json(json!({ "status": "stopped" })))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Submit a user message. Fire-and-forget: the turn's outcome arrives on
/// the event stream.
#[instrument(skip(state, request))]
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Json<Value>> {
    let handle = state
        .registry
        .get(&session_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no live session: {}", session_id)))?;

    if request.content.trim().is_empty() {
        return Err(ApiError::bad_request("message content must be non-empty"));
    }

    handle.send_message(&request.content).await;
    Ok(Json(json!({ "status": "ok" })))
}

/// Abort the current turn, if any.
#[instrument(skip(state))]
pub async fn interrupt_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let handle = state
        .registry
        .get(&session_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no live session: {}", session_id)))?;

    handle.interrupt();
    Ok(Json(json!({ "status": "interrupted" })))
}

// ============================================================================
// Event streaming
// ============================================================================

/// SSE stream of a live session's agent events.
///
/// Point-to-point: the queue receiver is mutex-guarded, so a second
/// concurrent stream simply waits its turn for each event. A synthetic
/// `done` item follows every `result` so clients know the turn is over.
#[instrument(skip(state))]
pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let handle = state
        .registry
        .get(&session_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no live session: {}", session_id)))?;

    let events = handle.events();
    let stream = futures::stream::unfold((events, false), |(events, emit_done)| async move {
        if emit_done {
            let item = Event::default().data(DONE_EVENT);
            return Some((Ok(item), (events, false)));
        }

        let next = {
            let mut rx = events.lock().await;
            rx.recv().await
        };
        match next {
            Some(event) => {
                let done_next = matches!(event, AgentEvent::Result { .. });
                let data = serde_json::to_string(&event).unwrap_or_else(|err| {
                    warn!("Failed to serialize agent event: {:?}", err);
                    r#"{"type":"error","kind":"turn","content":"event serialization failed"}"#
                        .to_string()
                });
                Some((Ok(Event::default().data(data)), (events, done_next)))
            }
            // Worker gone; end the stream
            None => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    ))
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AnnounceQuery {
    /// Optional SSE event label for the update.
    pub event: Option<String>,
}

/// Publish a progress update to all SSE listeners.
#[instrument(skip(state, payload))]
pub async fn announce_progress(
    State(state): State<AppState>,
    Query(query): Query<AnnounceQuery>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    state.progress.announce(&payload, query.event.as_deref());
    Json(json!({ "status": "ok" }))
}

/// SSE stream of conversion progress updates.
#[instrument(skip(state))]
pub async fn progress_events(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.progress.listen();
    let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(|msg| {
        let mut event = Event::default().data(msg.data);
        if let Some(label) = msg.event {
            event = event.event(label);
        }
        Ok::<_, Infallible>(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
