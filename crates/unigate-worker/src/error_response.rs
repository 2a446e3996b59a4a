use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};

use unigate_common::GatewayError;

/// Converts a [`GatewayError`] into the JSON error body and status code,
/// adding `Retry-After` when the error carries one.
pub fn error_response(err: &GatewayError) -> Response {
    let mut response = Response::builder()
        .status(err.status())
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(err.to_body()))
        .unwrap_or_else(|_| (err.status(), "internal error").into_response());

    if let Some(retry_after) = err.retry_after_secs() {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
    }
    response
}
