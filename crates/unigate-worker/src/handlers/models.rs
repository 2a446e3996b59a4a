use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;

use unigate_protocol::ModelList;

use crate::state::WorkerState;

/// `GET /v1/models`: the full enabled-and-available set from the current
/// Registry snapshot.
pub async fn list_models(State(state): State<Arc<WorkerState>>) -> Json<ModelList> {
    Json(state.registry.current().list())
}
