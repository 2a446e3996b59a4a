use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

/// The error currency crossing crate boundaries inside a Worker.
///
/// Every variant maps to exactly one HTTP status; the mapping lives on
/// the variant itself so the router never has to guess.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    RequestValidation(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("upstream auth error: {0}")]
    UpstreamAuth { status: u16, detail: String },
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),
    #[error("upstream protocol error: {0}")]
    UpstreamProtocolError(String),
    #[error("auth mint error: {0}")]
    AuthMintError(String),
    #[error("circuit open, retry after {retry_after_secs}s")]
    CircuitOpen { retry_after_secs: u64 },
    #[error("no healthy worker available")]
    ServiceUnavailable,
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("internal error")]
    InternalError(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RequestValidation(_) => StatusCode::BAD_REQUEST,
            GatewayError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamAuth { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            GatewayError::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamProtocolError(_) => StatusCode::BAD_GATEWAY,
            GatewayError::AuthMintError(_) => StatusCode::BAD_GATEWAY,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `type` field of the wire error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::RequestValidation(_)
            | GatewayError::ModelNotFound(_)
            | GatewayError::PayloadTooLarge => "invalid_request_error",
            GatewayError::RateLimited { .. } => "rate_limit_error",
            _ => "server_error",
        }
    }

    /// User-visible message. Internal errors never leak detail to the client;
    /// full detail only goes to `tracing`.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::InternalError(_) | GatewayError::Cancelled => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::CircuitOpen { retry_after_secs } => Some(*retry_after_secs),
            GatewayError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }

    pub fn to_body(&self) -> Bytes {
        #[derive(Serialize)]
        struct ErrorBody<'a> {
            error: ErrorInner<'a>,
        }
        #[derive(Serialize)]
        struct ErrorInner<'a> {
            message: String,
            #[serde(rename = "type")]
            kind: &'a str,
            code: String,
        }
        let body = ErrorBody {
            error: ErrorInner {
                message: self.public_message(),
                kind: self.error_type(),
                code: self.status().as_u16().to_string(),
            },
        };
        Bytes::from(serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec()))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamTransient(_) | GatewayError::Timeout
        )
    }
}
