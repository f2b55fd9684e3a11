//! Store-backed token bucket.
//!
//! State lives in the key-value store as a hash at `limiter:<name>:<scope>`
//! with fields `tokens` and `last`. Refill-and-deduct happens in one
//! server-evaluated operation, which keeps N instances coherent. Transport
//! failures deny admission.

use crate::{BucketStatus, RateLimiter};
use async_trait::async_trait;
use chrono::Utc;
use clustergenie_store::KvStore;
use std::sync::Arc;
use tracing::warn;

pub struct SharedBucket {
    kv: Arc<dyn KvStore>,
    key: String,
    capacity: f64,
    refill_rate: f64,
    ttl_ms: i64,
}

impl SharedBucket {
    pub fn new(
        kv: Arc<dyn KvStore>,
        name: &str,
        scope: &str,
        refill_rate: f64,
        capacity: f64,
        ttl_ms: i64,
    ) -> SharedBucket {
        SharedBucket {
            kv,
            key: format!("limiter:{}:{}", name, scope),
            capacity,
            refill_rate,
            ttl_ms,
        }
    }
}

#[async_trait]
impl RateLimiter for SharedBucket {
    async fn allow(&self, count: u32) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        match self
            .kv
            .token_bucket_take(
                &self.key,
                self.capacity,
                self.refill_rate,
                now_ms,
                count as f64,
                self.ttl_ms,
            )
            .await
        {
            Ok(take) => take.allowed,
            Err(e) => {
                // closed on failure: a broken store must not open the gate
                warn!(key = %self.key, "shared bucket denied on store error: {}", e);
                false
            }
        }
    }

    async fn status(&self) -> BucketStatus {
        let available = match self.kv.hgetall(&self.key).await {
            Ok(hash) if !hash.is_empty() => {
                let tokens: f64 = hash
                    .get("tokens")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.capacity);
                let last: i64 = hash
                    .get("last")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| Utc::now().timestamp_millis());
                let elapsed_s = ((Utc::now().timestamp_millis() - last) as f64 / 1000.0).max(0.0);
                (tokens + elapsed_s * self.refill_rate).min(self.capacity)
            }
            Ok(_) => self.capacity,
            Err(e) => {
                warn!(key = %self.key, "shared bucket status unavailable: {}", e);
                0.0
            }
        };
        BucketStatus {
            available,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustergenie_store::MemoryKv;
    use std::time::Duration;

    fn shared(kv: &Arc<dyn KvStore>, refill: f64, capacity: f64) -> SharedBucket {
        SharedBucket::new(kv.clone(), "test", "user:bob", refill, capacity, 60_000)
    }

    #[tokio::test]
    async fn two_instances_share_one_budget() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let a = shared(&kv, 0.5, 3.0);
        let b = shared(&kv, 0.5, 3.0);

        let mut allowed = 0;
        for i in 0..6 {
            let ok = if i % 2 == 0 {
                a.allow(1).await
            } else {
                b.allow(1).await
            };
            if ok {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3, "shared budget must admit exactly capacity");

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(a.allow(1).await || b.allow(1).await, "bucket must refill");
    }

    #[tokio::test]
    async fn contention_never_over_admits() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let a = Arc::new(shared(&kv, 0.0, 5.0));
        let b = Arc::new(shared(&kv, 0.0, 5.0));

        let mut handles = Vec::new();
        for i in 0..50 {
            let bucket = if i % 2 == 0 { a.clone() } else { b.clone() };
            handles.push(tokio::spawn(async move { bucket.allow(1).await }));
        }

        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        assert!(allowed <= 5, "admitted {} > capacity", allowed);
        assert!(!a.allow(1).await, "empty bucket with zero refill must deny");
    }

    #[tokio::test]
    async fn status_recomputes_without_consuming() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let bucket = shared(&kv, 0.0, 2.0);
        assert!(bucket.allow(1).await);

        let before = bucket.status().await;
        let after = bucket.status().await;
        assert_eq!(before.available, after.available);
        assert!(bucket.allow(1).await, "status must not consume tokens");
    }
}
