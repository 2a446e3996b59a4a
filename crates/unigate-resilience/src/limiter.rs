use std::sync::Mutex;
use std::time::Instant;

/// Token-bucket rate limiter. Refill is lazy: tokens
/// are only topped up when `acquire` is called, never on a background
/// timer, so an idle limiter costs nothing.
pub struct TokenBucket {
    capacity: f64,
    refill_rate_per_sec: f64,
    inner: Mutex<Inner>,
}

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_sec,
            inner: Mutex::new(Inner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempt to take one token. Returns `true` if the call may proceed.
    pub fn acquire(&self) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
        guard.tokens = (guard.tokens + elapsed * self.refill_rate_per_sec).min(self.capacity);
        guard.last_refill = now;

        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.inner.lock().unwrap().tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn allows_burst_up_to_capacity() {
        let bucket = TokenBucket::new(3.0, 1.0);
        assert!(bucket.acquire());
        assert!(bucket.acquire());
        assert!(bucket.acquire());
        assert!(!bucket.acquire());
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(1.0, 50.0);
        assert!(bucket.acquire());
        assert!(!bucket.acquire());
        std::thread::sleep(Duration::from_millis(40));
        assert!(bucket.acquire());
    }

    #[test]
    fn never_exceeds_capacity() {
        let bucket = TokenBucket::new(2.0, 1000.0);
        std::thread::sleep(Duration::from_millis(50));
        assert!(bucket.tokens() <= 2.0);
    }
}
