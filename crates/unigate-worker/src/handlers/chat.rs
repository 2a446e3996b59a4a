use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use unigate_common::GatewayError;
use unigate_protocol::{ChatRequest, StreamErrorChunk, StreamErrorInner};

use crate::dispatch::{call_chat_stream_with_resilience, call_chat_with_resilience};
use crate::error_response::error_response;
use crate::state::{RequestGuard, WorkerState};

const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_ROUTER_DEADLINE: Duration = Duration::from_secs(300);

/// `POST /v1/chat/completions`: parse, validate, look up the model, then
/// dispatch non-stream or stream per `stream`.
pub async fn chat_completions(State(state): State<Arc<WorkerState>>, body: Bytes) -> Response {
    let trace_id = Uuid::new_v4().to_string();

    if body.len() > MAX_BODY_BYTES {
        return error_response(&GatewayError::PayloadTooLarge);
    }

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&GatewayError::RequestValidation(format!(
                "invalid JSON body: {err}"
            )));
        }
    };

    if let Err(detail) = request.validate() {
        return error_response(&GatewayError::RequestValidation(detail));
    }

    let registry = state.registry.current();
    let Some(entry) = registry.get(&request.model) else {
        return error_response(&GatewayError::ModelNotFound(request.model.clone()));
    };

    info!(
        event = "chat_request_received",
        trace_id = %trace_id,
        worker_id = %state.worker_id,
        model = %request.model,
        stream = request.stream,
    );

    let guard = state.begin_request();
    let deadline = Instant::now() + DEFAULT_ROUTER_DEADLINE;

    if !request.stream {
        let result = call_chat_with_resilience(&entry, &request, deadline).await;
        drop(guard);
        return match result {
            Ok(response) => axum::Json(response).into_response(),
            Err(err) => {
                warn!(event = "chat_request_failed", trace_id = %trace_id, error = %err);
                error_response(&err)
            }
        };
    }

    match call_chat_stream_with_resilience(&entry, &request, deadline).await {
        Ok(chat_stream) => {
            let model = request.model.clone();
            let sse_stream = sse_events(chat_stream, trace_id.clone(), model, guard);
            Sse::new(sse_stream)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(err) => {
            drop(guard);
            warn!(event = "chat_stream_open_failed", trace_id = %trace_id, error = %err);
            error_response(&err)
        }
    }
}

/// Adapts the adapter-level chunk stream into SSE `Event`s. Errors observed
/// after the first byte of the response has already gone out cannot become
/// an HTTP error status any more, so they are delivered as an in-band error
/// chunk followed by `[DONE]`, and the wrapper stream
/// always ends cleanly (`Infallible`) so axum never has to guess at a
/// trailing status.
fn sse_events(
    mut chat_stream: unigate_adapter::ChatStream,
    trace_id: String,
    model: String,
    guard: RequestGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = guard;
        loop {
            match chat_stream.next().await {
                Some(Ok(chunk)) => {
                    let data = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                    yield Ok(Event::default().data(data));
                }
                Some(Err(err)) => {
                    warn!(event = "chat_stream_failed", trace_id = %trace_id, error = %err);
                    let error_chunk = StreamErrorChunk {
                        error: StreamErrorInner {
                            message: err.public_message(),
                            kind: err.error_type().to_string(),
                        },
                    };
                    if let Ok(data) = serde_json::to_string(&error_chunk) {
                        yield Ok(Event::default().data(data));
                    }
                    yield Ok(Event::default().data("[DONE]"));
                    return;
                }
                None => {
                    info!(event = "chat_stream_completed", trace_id = %trace_id, model = %model);
                    yield Ok(Event::default().data("[DONE]"));
                    return;
                }
            }
        }
    }
}
