use serde::{Deserialize, Serialize};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::limiter::TokenBucket;
use crate::retry::RetryPolicy;

/// The per-model configuration that produces a [`ModelResilience`] instance.
/// Deserialized straight from the `retry` object in the model config file;
/// the rate limiter is opt-in and off by default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_rate_per_sec: f64,
}

/// Owns the shared, mutable-but-lock-cheap state for one model id: a
/// breaker and an optional token bucket. One instance lives inside the
/// Registry for the lifetime of the model entry, shared within a Worker;
/// mutations occur under a short critical section.
pub struct ModelResilience {
    pub retry: RetryPolicy,
    pub breaker: CircuitBreaker,
    pub limiter: Option<TokenBucket>,
}

impl ModelResilience {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            retry: config.retry,
            breaker: CircuitBreaker::new(config.breaker),
            limiter: config
                .rate_limit
                .map(|rl| TokenBucket::new(rl.capacity, rl.refill_rate_per_sec)),
        }
    }
}
