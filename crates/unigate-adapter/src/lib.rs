//! The four Adapter variants that dispatch a normalized chat request to an
//! upstream provider: `PassThrough`, `CustomHttp`, `Subprocess`, and
//! `DuplexSocket`.

pub mod adapter;
pub mod custom_http;
pub mod duplex;
pub mod passthrough;
pub mod subprocess;

pub use adapter::{Adapter, ChatStream};
pub use custom_http::CustomHttpAdapter;
pub use duplex::DuplexSocketAdapter;
pub use passthrough::PassThroughAdapter;
pub use subprocess::{InputFormat, OutputFormat, SubprocessAdapter};

use unigate_common::GatewayError;
use unigate_resilience::{classify_status, Outcome};

/// Classify a transport-level `reqwest` failure into the gateway's error
/// currency. Distinguishes timeouts so the Router can report `Timeout`
/// rather than a generic upstream failure.
pub(crate) fn classify_transport(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::UpstreamTransient(error.to_string())
    }
}

/// Classify a non-2xx upstream HTTP status into the gateway's error
/// currency. Retryable statuses (408/425/429/5xx) become `UpstreamTransient`
/// so the dispatch retry loop fires; everything else is a hard `UpstreamAuth`
/// that carries the upstream status straight through to the client.
pub(crate) fn upstream_status_error(status: u16, detail: String) -> GatewayError {
    match classify_status(status) {
        Outcome::Retryable => GatewayError::UpstreamTransient(detail),
        _ => GatewayError::UpstreamAuth { status, detail },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_become_upstream_transient() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(matches!(
                upstream_status_error(status, "x".to_string()),
                GatewayError::UpstreamTransient(_)
            ));
        }
    }

    #[test]
    fn non_retryable_statuses_stay_upstream_auth() {
        for status in [400, 401, 403, 404] {
            match upstream_status_error(status, "x".to_string()) {
                GatewayError::UpstreamAuth { status: got, .. } => assert_eq!(got, status),
                other => panic!("expected UpstreamAuth, got {other:?}"),
            }
        }
    }
}
