use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_duration: Duration,
    pub sliding_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
            sliding_window: Duration::from_secs(60),
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    window_started_at: Instant,
    half_open_probe_in_flight: bool,
}

/// Per-upstream-model circuit breaker: trips open after a run of failures,
/// probes with a single half-open call, and only fully recovers once that
/// probe (and a run-up of `success_threshold` calls) succeeds.
///
/// The breaker observes *post-retry* outcomes only — the retry layer
/// reports one outcome per logical call, not per individual HTTP attempt —
/// so a call that succeeds on its second retry counts as one success here,
/// never as a failure followed by a success.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermit {
    Allowed,
    /// Denied; caller should fail fast with `CircuitOpen` and this many
    /// seconds until the breaker is eligible to move to `HalfOpen`.
    Denied { retry_after_secs: u64 },
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                window_started_at: Instant::now(),
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Ask permission to make an upstream call. `Open` denies every call
    /// until `open_duration` has elapsed, at which point the breaker moves
    /// itself to `HalfOpen` and permits exactly one probe at a time.
    pub fn try_acquire(&self) -> CallPermit {
        let mut guard = self.inner.lock().unwrap();
        match guard.state {
            BreakerState::Closed => CallPermit::Allowed,
            BreakerState::Open => {
                let opened_at = guard.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.open_duration {
                    guard.state = BreakerState::HalfOpen;
                    guard.consecutive_successes = 0;
                    guard.half_open_probe_in_flight = true;
                    CallPermit::Allowed
                } else {
                    let remaining = self.config.open_duration - elapsed;
                    CallPermit::Denied {
                        retry_after_secs: remaining.as_secs().max(1),
                    }
                }
            }
            BreakerState::HalfOpen => {
                if guard.half_open_probe_in_flight {
                    CallPermit::Denied {
                        retry_after_secs: 1,
                    }
                } else {
                    guard.half_open_probe_in_flight = true;
                    CallPermit::Allowed
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.half_open_probe_in_flight = false;
        match guard.state {
            BreakerState::Closed => {
                guard.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.state = BreakerState::Closed;
                    guard.consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                    guard.window_started_at = Instant::now();
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.half_open_probe_in_flight = false;
        match guard.state {
            BreakerState::Closed => {
                if guard.window_started_at.elapsed() > self.config.sliding_window {
                    guard.consecutive_failures = 0;
                    guard.window_started_at = Instant::now();
                }
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.state = BreakerState::Open;
                    guard.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                guard.state = BreakerState::Open;
                guard.opened_at = Some(Instant::now());
                guard.consecutive_successes = 0;
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            open_duration: Duration::from_millis(20),
            sliding_window: Duration::from_secs(60),
        }
    }

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(fast_config());
        assert_eq!(breaker.try_acquire(), CallPermit::Allowed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.try_acquire(), CallPermit::Allowed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn denies_calls_while_open() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.on_failure();
        breaker.on_failure();
        match breaker.try_acquire() {
            CallPermit::Denied { .. } => {}
            CallPermit::Allowed => panic!("expected denial while open"),
        }
    }

    #[test]
    fn half_open_after_open_duration_then_closes_on_successes() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.on_failure();
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(breaker.try_acquire(), CallPermit::Allowed);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.try_acquire(), CallPermit::Allowed);
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.on_failure();
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(breaker.try_acquire(), CallPermit::Allowed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
