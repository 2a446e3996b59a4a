use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use unigate_protocol::ModelList;

use crate::pool::Pool;

pub async fn list_models(State(pool): State<Arc<Pool>>) -> Json<ModelList> {
    Json(pool.models().await)
}
