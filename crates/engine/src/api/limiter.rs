//! Token-bucket rate limiting for outbound brokerage calls
//!
//! Allows a burst up to capacity, then refills at a steady rate. Alpaca
//! allows 200 requests/minute on trading endpoints and is tighter on data,
//! so the client keeps one bucket per endpoint family.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

pub struct TokenBucket {
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket sized for Alpaca trading endpoints (200 requests/minute)
    pub fn alpaca_trading() -> Self {
        Self::new(200, 200.0 / 60.0)
    }

    /// Bucket sized for Alpaca data endpoints (100 requests/minute)
    pub fn alpaca_data() -> Self {
        Self::new(100, 100.0 / 60.0)
    }

    /// Try to take `tokens` immediately; false when the bucket is dry
    pub async fn try_consume(&self, tokens: f64) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= tokens {
            state.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Wait until one token is available
    pub async fn acquire(&self) {
        self.wait_for_tokens(1.0).await;
    }

    /// Wait until `tokens` are available
    pub async fn wait_for_tokens(&self, tokens: f64) {
        loop {
            if self.try_consume(tokens).await {
                return;
            }
            let deficit = {
                let state = self.state.lock().await;
                (tokens - state.tokens).max(0.0)
            };
            let wait = Duration::from_secs_f64(deficit / self.refill_rate);
            sleep(wait.min(MAX_WAIT_SLICE)).await;
        }
    }

    /// Current token count after refill accounting
    pub async fn available(&self) -> f64 {
        let state = self.state.lock().await;
        let elapsed = Instant::now().duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.refill_rate).min(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_up_to_capacity() {
        let bucket = TokenBucket::new(3, 1.0);
        assert!(bucket.try_consume(1.0).await);
        assert!(bucket.try_consume(1.0).await);
        assert!(bucket.try_consume(1.0).await);
        assert!(!bucket.try_consume(1.0).await, "bucket should be dry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_over_time() {
        let bucket = TokenBucket::new(2, 1.0);
        assert!(bucket.try_consume(2.0).await);
        assert!(!bucket.try_consume(1.0).await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_consume(1.0).await, "one token refilled per second");
        assert!(!bucket.try_consume(1.0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let bucket = TokenBucket::new(2, 10.0);
        assert!(bucket.try_consume(2.0).await);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((bucket.available().await - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(1, 2.0);
        bucket.acquire().await;
        // Paused clock: acquire must complete once 0.5s of refill elapses
        bucket.acquire().await;
        assert!(!bucket.try_consume(1.0).await);
    }
}
