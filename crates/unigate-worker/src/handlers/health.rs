use axum::response::Json;
use serde_json::{json, Value};

/// `GET /health`: a liveness probe the Router always
/// answers, independent of Registry or upstream state.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
