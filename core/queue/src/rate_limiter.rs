//! Dynamic token-bucket rate limiter shared per host and per shard.
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

/// Token bucket admission control used to pace reads against persistence.
///
/// One instance is typically shared across every shard on a host (host-level limit) and
/// a second, per-shard instance enforces a tighter local budget; callers acquire from both.
pub struct RateLimiter {
    burst: f64,
    rate_per_sec: AtomicI64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `rate_per_sec` tokens per second, with `burst` capacity.
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        RateLimiter {
            burst,
            rate_per_sec: AtomicI64::new(rate_per_sec as i64),
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Change the configured rate without losing the accumulated token balance.
    pub fn set_rate(&self, rate_per_sec: f64) {
        self.rate_per_sec.store(rate_per_sec as i64, Ordering::Relaxed);
    }

    fn refill(&self, state: &mut BucketState) {
        let rate = self.rate_per_sec.load(Ordering::Relaxed) as f64;
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(self.burst);
        state.last_refill = Instant::now();
    }

    /// Try to take one token without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait up to `timeout` for a token to become available.
    ///
    /// On timeout the caller should back off the poll level it was about to read from and
    /// try again on the next cycle, per the transfer/timer queue processor poll loop.
    pub async fn acquire(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("rate limit wait timed out after {:?}", timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RateLimiter;
    use std::time::Duration;

    #[test]
    fn burst_is_consumed_then_denied() {
        let limiter = RateLimiter::new(1.0, 2.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out_when_rate_is_zero() {
        let limiter = RateLimiter::new(0.0, 1.0);
        assert!(limiter.try_acquire());
        let result = limiter.acquire(Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
