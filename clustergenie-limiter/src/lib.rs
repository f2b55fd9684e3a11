//! # ClusterGenie Limiter
//!
//! Token-bucket admission control with per-(name, scope) buckets. Scopes key
//! the tenant axis: `""` (global), `user:<id>`, `cluster:<id>`.
//!
//! Two interchangeable bucket implementations sit behind one trait: a
//! mutex-guarded local bucket, and a shared bucket whose refill-and-deduct is
//! a single atomic operation in the key-value store so N instances stay
//! coherent. The manager resolves per-bucket configuration from store
//! overrides, registered defaults, then a hard default.

pub mod bucket;
pub mod manager;
pub mod shared;

pub use bucket::LocalBucket;
pub use manager::LimiterManager;
pub use shared::SharedBucket;

use async_trait::async_trait;

/// Point-in-time view of a bucket.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BucketStatus {
    pub available: f64,
    pub capacity: f64,
    pub refill_rate: f64,
}

/// A token bucket. `allow` attempts to consume `count` tokens; `status`
/// reports availability without consuming.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, count: u32) -> bool;
    async fn status(&self) -> BucketStatus;
}
