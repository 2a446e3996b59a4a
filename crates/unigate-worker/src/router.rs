use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, chat, health, models};
use crate::state::WorkerState;

const CHAT_BODY_LIMIT: usize = 5 * 1024 * 1024;

/// Assembles the Worker's `axum::Router`: build once, `with_state`, return.
/// The panic guard sits outermost so a panicking handler — however deep
/// the Adapter call chain — is still converted to a JSON 500 instead of
/// taking the Worker process down.
pub fn build_router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/v1/models", get(models::list_models))
        .route(
            "/v1/chat/completions",
            post(chat::chat_completions).layer(DefaultBodyLimit::max(CHAT_BODY_LIMIT)),
        )
        .route("/admin/shutdown", post(admin::shutdown))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
