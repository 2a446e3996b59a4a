/// Outcome classification used to decide retry/breaker behavior. Adapters
/// translate whatever their upstream returned into one of these before
/// calling into [`crate::retry`] / [`crate::breaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retryable,
    NonRetryable,
}

/// Classify an upstream HTTP status: 408/425/429 and 5xx are transient;
/// other 4xx are not.
pub fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        408 | 425 | 429 | 500 | 502 | 503 | 504 => Outcome::Retryable,
        _ => Outcome::NonRetryable,
    }
}

/// Classify a transport-level failure (connect/timeout/DNS/TLS) — these
/// are always retryable.
pub fn classify_transport_error() -> Outcome {
    Outcome::Retryable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [408, 425, 429, 500, 502, 503, 504] {
            assert_eq!(classify_status(status), Outcome::Retryable, "{status}");
        }
    }

    #[test]
    fn non_retryable_statuses() {
        for status in [400, 401, 403, 404, 413] {
            assert_eq!(classify_status(status), Outcome::NonRetryable, "{status}");
        }
    }

    #[test]
    fn success_statuses() {
        assert_eq!(classify_status(200), Outcome::Success);
    }
}
