use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, chat, health, models};
use crate::state::AppState;

/// Assembles the Supervisor's own HTTP surface: identical client-facing
/// endpoints to a Worker, plus the `/admin/*` control surface and
/// `/metrics`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/v1/models", get(models::list_models))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/admin/ensure_started", post(admin::ensure_started))
        .route("/admin/stop", post(admin::stop))
        .route("/admin/status", get(admin::status))
        .route("/metrics", get(admin::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
