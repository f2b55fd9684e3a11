//! Process-local token bucket.

use crate::{BucketStatus, RateLimiter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Instant;

struct State {
    tokens: f64,
    last: Instant,
}

/// Mutex-guarded token bucket scoped to this process only.
pub struct LocalBucket {
    state: Mutex<State>,
    capacity: f64,
    refill_rate: f64,
}

impl LocalBucket {
    /// New bucket that starts full and refills at `refill_rate` tokens per
    /// second up to `capacity`.
    pub fn new(refill_rate: f64, capacity: f64) -> LocalBucket {
        LocalBucket {
            state: Mutex::new(State {
                tokens: capacity,
                last: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    fn refill(&self, state: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
            state.last = now;
        }
    }
}

#[async_trait]
impl RateLimiter for LocalBucket {
    async fn allow(&self, count: u32) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= count as f64 {
            state.tokens -= count as f64;
            true
        } else {
            false
        }
    }

    async fn status(&self) -> BucketStatus {
        let mut state = self.state.lock();
        self.refill(&mut state);
        BucketStatus {
            available: state.tokens,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn consumes_then_refills() {
        // 2 tokens per second, capacity 2
        let bucket = LocalBucket::new(2.0, 2.0);

        assert!(bucket.allow(1).await);
        assert!(bucket.allow(1).await);
        assert!(!bucket.allow(1).await, "third token must be rejected");

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(bucket.allow(1).await, "token must refill after wait");
    }

    #[tokio::test]
    async fn status_reports_without_consuming() {
        let bucket = LocalBucket::new(1.0, 4.0);
        assert!(bucket.allow(1).await);

        let status = bucket.status().await;
        assert!(status.available >= 3.0);
        assert_eq!(status.capacity, 4.0);
        assert_eq!(status.refill_rate, 1.0);

        let again = bucket.status().await;
        assert!(again.available >= status.available);
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let bucket = LocalBucket::new(100.0, 2.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = bucket.status().await;
        assert!(status.available <= 2.0);
    }
}
