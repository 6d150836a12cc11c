//! Optional per-VU token bucket rate limiter — §4.C. Refill is continuous,
//! computed from elapsed wall-clock time rather than a ticking background
//! task, so there's nothing to spawn or cancel per VU.

use std::time::Instant;

pub struct TokenBucket {
    rps: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rps: f64, burst: f64) -> Self {
        TokenBucket {
            rps,
            burst: burst.max(1.0),
            tokens: burst.max(1.0),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rps).min(self.burst);
        self.last_refill = now;
    }

    /// Attempts to take one token. Returns `true` if one was available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long the caller should wait before a token becomes available,
    /// given the current deficit.
    pub fn wait_duration(&mut self) -> std::time::Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return std::time::Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        std::time::Duration::from_secs_f64(deficit / self.rps.max(f64::MIN_POSITIVE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full_up_to_burst() {
        let mut bucket = TokenBucket::new(10.0, 5.0);
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let mut bucket = TokenBucket::new(1000.0, 1.0);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn wait_duration_is_zero_when_tokens_available() {
        let mut bucket = TokenBucket::new(10.0, 5.0);
        assert_eq!(bucket.wait_duration(), std::time::Duration::ZERO);
    }

    #[test]
    fn wait_duration_is_positive_when_exhausted() {
        let mut bucket = TokenBucket::new(1.0, 1.0);
        assert!(bucket.try_acquire());
        assert!(bucket.wait_duration() > std::time::Duration::ZERO);
    }
}
