use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use unigate_common::GatewayError;

use crate::error_response::error_response;
use crate::metrics;
use crate::pool::Pool;
use crate::worker::WorkerRequestGuard;

/// Reverse-proxies `/v1/chat/completions` to a chosen Worker: the
/// Supervisor never parses the request beyond `stream`, and relays the
/// upstream status/content-type/body bytes unchanged.
pub async fn chat_completions(State(pool): State<Arc<Pool>>, body: Bytes) -> Response {
    let is_stream = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("stream").and_then(|s| s.as_bool()))
        .unwrap_or(false);

    let Some(worker) = pool.choose_worker() else {
        return error_response(&GatewayError::ServiceUnavailable).into_response();
    };

    metrics::record_request_started();
    let started_at = Instant::now();
    let guard = worker.begin_request(is_stream);

    let url = format!("{}/v1/chat/completions", worker.base_url(pool.host()));
    let upstream = pool
        .http_client()
        .post(&url)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await;

    let resp = match upstream {
        Ok(resp) => resp,
        Err(_) => {
            drop(guard);
            metrics::record_request_failed();
            return error_response(&GatewayError::UpstreamTransient(
                "worker unreachable".to_string(),
            ))
            .into_response();
        }
    };

    let status = resp.status();
    let content_type = resp
        .headers()
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| axum::http::HeaderValue::from_static("application/json"));

    if !is_stream {
        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(_) => {
                drop(guard);
                metrics::record_request_failed();
                return error_response(&GatewayError::UpstreamTransient(
                    "worker response read failed".to_string(),
                ))
                .into_response();
            }
        };
        drop(guard);
        if status.is_success() {
            metrics::record_request_succeeded(started_at.elapsed().as_millis() as f64);
        } else {
            metrics::record_request_failed();
        }
        return Response::builder()
            .status(status)
            .header("content-type", content_type)
            .body(axum::body::Body::from(bytes))
            .unwrap();
    }

    if !status.is_success() {
        let bytes = resp.bytes().await.unwrap_or_default();
        drop(guard);
        metrics::record_request_failed();
        return Response::builder()
            .status(status)
            .header("content-type", content_type)
            .body(axum::body::Body::from(bytes))
            .unwrap();
    }

    metrics::record_request_succeeded(started_at.elapsed().as_millis() as f64);
    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(axum::body::Body::from_stream(relay_stream(resp, guard)))
        .unwrap()
}

/// Forwards the upstream byte stream untouched; the request guard is held
/// for the stream's full lifetime so in-flight accounting covers the
/// entire response, not just the time to the first byte.
fn relay_stream(
    resp: reqwest::Response,
    guard: WorkerRequestGuard,
) -> impl Stream<Item = Result<Bytes, reqwest::Error>> {
    async_stream::stream! {
        let _guard = guard;
        let mut byte_stream = resp.bytes_stream();
        let mut chunks: u64 = 0;
        while let Some(chunk) = byte_stream.next().await {
            chunks += 1;
            yield chunk;
        }
        metrics::record_chunks_per_stream(chunks as f64);
    }
}
