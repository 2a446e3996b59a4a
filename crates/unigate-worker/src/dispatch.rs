use tokio::time::Instant;

use unigate_adapter::ChatStream;
use unigate_common::GatewayError;
use unigate_protocol::{ChatRequest, ChatResponse};
use unigate_registry::RegistryEntry;
use unigate_resilience::{BreakerState, CallPermit};

/// Dispatches a non-stream chat call through the rate limiter, circuit
/// breaker, and retry policy attached to this model.
///
/// The breaker sees exactly one `on_success`/`on_failure` call per logical
/// request — for the final, post-retry outcome — never once per HTTP
/// attempt, so a call that succeeds on its second retry never looks like a
/// failure to the breaker. Before each retry (not the first attempt) the
/// breaker state is re-checked: if a concurrent call against the same
/// model tripped it open while we were waiting, the remaining attempts are
/// abandoned and `CircuitOpen` is surfaced immediately rather than spending
/// the rest of the deadline on retries doomed to fail fast anyway.
pub async fn call_chat_with_resilience(
    entry: &RegistryEntry,
    request: &ChatRequest,
    deadline: Instant,
) -> Result<ChatResponse, GatewayError> {
    if let Some(limiter) = &entry.resilience.limiter {
        if !limiter.acquire() {
            return Err(GatewayError::RateLimited {
                retry_after_secs: None,
            });
        }
    }

    if let CallPermit::Denied { retry_after_secs } = entry.resilience.breaker.try_acquire() {
        return Err(GatewayError::CircuitOpen { retry_after_secs });
    }

    let policy = &entry.resilience.retry;
    let mut attempt: u32 = 0;

    loop {
        let outcome = entry.adapter.chat(request, deadline).await;
        let err = match outcome {
            Ok(response) => {
                entry.resilience.breaker.on_success();
                return Ok(response);
            }
            Err(err) => err,
        };

        let can_retry = policy.enabled && err.is_retryable() && attempt < policy.max_retries;
        if !can_retry {
            entry.resilience.breaker.on_failure();
            return Err(err);
        }
        attempt += 1;

        if entry.resilience.breaker.state() == BreakerState::Open {
            let retry_after_secs = match entry.resilience.breaker.try_acquire() {
                CallPermit::Denied { retry_after_secs } => retry_after_secs,
                CallPermit::Allowed => 1,
            };
            return Err(GatewayError::CircuitOpen { retry_after_secs });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            entry.resilience.breaker.on_failure();
            return Err(GatewayError::Timeout);
        }
        let delay = policy.delay_for_attempt(attempt).min(remaining);
        tokio::time::sleep(delay).await;
    }
}

/// Dispatches a streaming chat call. Streams get exactly one attempt;
/// resending a partially delivered stream to the client has no sane
/// semantics, so retries are reserved for non-stream calls. Still
/// consult the limiter and breaker once before opening the connection, and
/// still report the outcome of that single attempt to the breaker.
pub async fn call_chat_stream_with_resilience(
    entry: &RegistryEntry,
    request: &ChatRequest,
    deadline: Instant,
) -> Result<ChatStream, GatewayError> {
    if let Some(limiter) = &entry.resilience.limiter {
        if !limiter.acquire() {
            return Err(GatewayError::RateLimited {
                retry_after_secs: None,
            });
        }
    }

    if let CallPermit::Denied { retry_after_secs } = entry.resilience.breaker.try_acquire() {
        return Err(GatewayError::CircuitOpen { retry_after_secs });
    }

    match entry.adapter.chat_stream(request, deadline).await {
        Ok(stream) => {
            entry.resilience.breaker.on_success();
            Ok(stream)
        }
        Err(err) => {
            entry.resilience.breaker.on_failure();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use unigate_adapter::{Adapter, ChatStream};
    use unigate_protocol::{ChatChoice, ChatMessage, ChatResponse, ModelDescriptor};
    use unigate_resilience::{BreakerConfig, ModelResilience, ResilienceConfig, RetryPolicy};

    use super::*;

    struct FlakyAdapter {
        failures_then_success: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Adapter for FlakyAdapter {
        async fn chat(&self, _request: &ChatRequest, _deadline: Instant) -> Result<ChatResponse, GatewayError> {
            let call_number = self.calls.fetch_add(1, Ordering::SeqCst);
            if call_number < self.failures_then_success {
                Err(GatewayError::UpstreamTransient("flaky".to_string()))
            } else {
                Ok(ChatResponse::new(
                    "resp-1".to_string(),
                    "m".to_string(),
                    0,
                    vec![ChatChoice {
                        index: 0,
                        message: ChatMessage {
                            role: "assistant".to_string(),
                            content: serde_json::Value::String("ok".to_string()),
                            name: None,
                        },
                        finish_reason: Some("stop".to_string()),
                    }],
                ))
            }
        }

        async fn chat_stream(&self, _request: &ChatRequest, _deadline: Instant) -> Result<ChatStream, GatewayError> {
            unimplemented!("not exercised by these tests")
        }

        fn is_available(&self) -> bool {
            true
        }

        fn model_info(&self) -> ModelDescriptor {
            ModelDescriptor::new("m", "test")
        }
    }

    fn test_request() -> ChatRequest {
        ChatRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: serde_json::Value::String("hi".to_string()),
                name: None,
            }],
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            user: None,
            stream: false,
        }
    }

    fn entry_with(adapter: FlakyAdapter, retry: RetryPolicy) -> RegistryEntry {
        RegistryEntry {
            adapter: Arc::new(adapter),
            resilience: Arc::new(ModelResilience::new(ResilienceConfig {
                retry,
                breaker: BreakerConfig::default(),
                rate_limit: None,
            })),
            descriptor: ModelDescriptor::new("m", "test"),
        }
    }

    #[tokio::test]
    async fn succeeds_after_retrying_transient_failures() {
        let entry = entry_with(
            FlakyAdapter {
                failures_then_success: 2,
                calls: AtomicUsize::new(0),
            },
            RetryPolicy {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
                ..Default::default()
            },
        );
        let request = test_request();
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = call_chat_with_resilience(&entry, &request, deadline).await;
        assert!(result.is_ok());
        assert_eq!(entry.resilience.breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_and_reports_one_failure_to_breaker() {
        let entry = entry_with(
            FlakyAdapter {
                failures_then_success: usize::MAX,
                calls: AtomicUsize::new(0),
            },
            RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
                ..Default::default()
            },
        );
        let request = test_request();
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = call_chat_with_resilience(&entry, &request, deadline).await;
        assert!(matches!(result, Err(GatewayError::UpstreamTransient(_))));
        // One post-retry outcome reported, not one per attempt: a single
        // failure never reaches the default failure_threshold of 5.
        assert_eq!(entry.resilience.breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn fails_fast_when_breaker_already_open() {
        let entry = entry_with(
            FlakyAdapter {
                failures_then_success: 0,
                calls: AtomicUsize::new(0),
            },
            RetryPolicy::disabled(),
        );
        // Trip the breaker directly via repeated failure reports.
        for _ in 0..5 {
            entry.resilience.breaker.on_failure();
        }
        assert_eq!(entry.resilience.breaker.state(), BreakerState::Open);

        let request = test_request();
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = call_chat_with_resilience(&entry, &request, deadline).await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
    }
}
