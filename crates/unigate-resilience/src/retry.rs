use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy parameters. A model config entry that omits `retry`
/// entirely gets these defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before attempt `n` (1-indexed: the delay *before* the n-th
    /// retry, i.e. `n=1` is the delay after the first failed attempt).
    /// `min(max_delay, initial_delay * base^(n-1))`, then jittered by a
    /// uniform factor in `[0.75, 1.25]` when jitter is enabled.
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        let base_secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(n as i32 - 1);
        let capped = base_secs.min(self.max_delay.as_secs_f64());
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.75..=1.25)
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    /// Upper bound on total delay across all retries, used by property P4.
    pub fn max_total_delay(&self) -> Duration {
        let mut total = 0.0f64;
        for n in 1..=self.max_retries {
            let base_secs =
                self.initial_delay.as_secs_f64() * self.exponential_base.powi(n as i32 - 1);
            let capped = base_secs.min(self.max_delay.as_secs_f64());
            total += capped * if self.jitter { 1.25 } else { 1.0 };
        }
        Duration::from_secs_f64(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_follows_exponential_backoff_without_jitter() {
        let policy = RetryPolicy {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            jitter: false,
            max_delay: Duration::from_secs(3),
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let d = policy.delay_for_attempt(1).as_secs_f64();
            assert!(d >= 0.75 && d <= 1.25, "delay {d} out of bounds");
        }
    }
}
