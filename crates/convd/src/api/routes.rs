//! API route definitions.

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // The backend fronts a local desktop client; any origin is fine.
    let cors = CorsLayer::permissive();

    // Tracing layer with request timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(handlers::health))
        // Session management
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{session_id}", get(handlers::get_session))
        .route("/sessions/{session_id}", delete(handlers::delete_session))
        .route("/sessions/{session_id}/message", post(handlers::send_message))
        .route(
            "/sessions/{session_id}/interrupt",
            post(handlers::interrupt_session),
        )
        .route("/sessions/{session_id}/events", get(handlers::session_events))
        // Conversion progress fan-out
        .route("/progress", post(handlers::announce_progress))
        .route("/progress/events", get(handlers::progress_events))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
