//! Rate Limiter (C9)
//!
//! A token bucket admission gate in front of the decision engine (spec
//! §4.8). Required to be "thread-safe without blocking: use atomic counters
//! with compare-and-swap on the token field" — no mutex guards the hot path,
//! refill is computed lazily on every `allow()` call from elapsed wall time.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Fixed-point scale for token counts, so fractional refill per call doesn't
/// get lost to integer truncation between calls.
const SCALE: f64 = 1_000.0;

pub struct RateLimiter {
    max_tokens: f64,
    refill_per_sec: f64,
    tokens: AtomicI64,
    last_refill_nanos: AtomicU64,
    start: Instant,
}

impl RateLimiter {
    pub fn new(max_tokens: u32, refill_per_sec: f64) -> Self {
        Self {
            max_tokens: max_tokens as f64,
            refill_per_sec,
            tokens: AtomicI64::new((max_tokens as f64 * SCALE) as i64),
            last_refill_nanos: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Admits the caller if a token is available, consuming one. Lock-free:
    /// refill and consumption are applied via a CAS retry loop so concurrent
    /// callers never block on each other.
    pub fn allow(&self) -> bool {
        let now_nanos = self.start.elapsed().as_nanos() as u64;

        loop {
            let last = self.last_refill_nanos.load(Ordering::Acquire);
            let elapsed_secs = (now_nanos.saturating_sub(last)) as f64 / 1_000_000_000.0;
            let refill = elapsed_secs * self.refill_per_sec * SCALE;

            let current = self.tokens.load(Ordering::Acquire);
            let capped = ((current as f64 + refill).min(self.max_tokens * SCALE)) as i64;

            if capped < SCALE as i64 {
                // Not enough tokens even after refill; publish the refill
                // amount so the next caller doesn't redo this work, but deny.
                if refill > 0.0 {
                    let _ = self.tokens.compare_exchange(
                        current,
                        capped,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    let _ = self.last_refill_nanos.compare_exchange(
                        last,
                        now_nanos,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                }
                return false;
            }

            let after_consume = capped - SCALE as i64;
            if self
                .tokens
                .compare_exchange(current, after_consume, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let _ = self.last_refill_nanos.compare_exchange(
                    last,
                    now_nanos,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                return true;
            }
            // Lost the race with another caller; retry against fresh state.
        }
    }

    pub fn available_tokens(&self) -> f64 {
        self.tokens.load(Ordering::Acquire) as f64 / SCALE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_bucket_capacity_then_rejects() {
        let limiter = RateLimiter::new(3, 0.0);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(1, 1_000_000.0); // refills almost instantly
        assert!(limiter.allow());
        assert!(!limiter.allow());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(limiter.allow());
    }

    #[test]
    fn never_exceeds_capacity_under_long_idle() {
        let limiter = RateLimiter::new(2, 100.0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
