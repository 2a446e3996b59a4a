use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::pool::Pool;

/// `POST /admin/ensure_started` — idempotent, spawns every Worker on first
/// call only.
pub async fn ensure_started(State(pool): State<Arc<Pool>>) -> impl IntoResponse {
    pool.ensure_started().await;
    Json(serde_json::json!({ "status": "started" }))
}

/// `POST /admin/stop` — terminates every Worker; a later
/// `/admin/ensure_started` call respawns the pool.
pub async fn stop(State(pool): State<Arc<Pool>>) -> impl IntoResponse {
    pool.stop().await;
    Json(serde_json::json!({ "status": "stopped" }))
}

pub async fn status(State(pool): State<Arc<Pool>>) -> impl IntoResponse {
    Json(pool.status())
}

pub async fn metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
