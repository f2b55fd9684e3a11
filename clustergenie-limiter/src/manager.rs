//! Limiter manager: named buckets with optional scopes.
//!
//! `get_or_create` is the only way scoped buckets come into existence. The
//! effective configuration is resolved in order: store override for the exact
//! scope, store override for the bucket's global scope, registered default,
//! hard default `(refill 0.2/s, capacity 5)`.

use crate::bucket::LocalBucket;
use crate::shared::SharedBucket;
use crate::{BucketStatus, RateLimiter};
use clustergenie_core::config::BucketSettings;
use clustergenie_core::errors::CoreResult;
use clustergenie_store::KvStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_SETTINGS: BucketSettings = BucketSettings {
    refill_rate: 0.2,
    capacity: 5.0,
};
const DEFAULT_TTL_MS: i64 = 60_000;
const CONFIG_INDEX_KEY: &str = "limiter_configs:all";

pub struct LimiterManager {
    /// name → scope → bucket
    buckets: RwLock<HashMap<String, HashMap<String, Arc<dyn RateLimiter>>>>,
    /// registered defaults per name
    configs: RwLock<HashMap<String, BucketSettings>>,
    /// when present, scoped buckets are store-backed and shared across
    /// instances; otherwise buckets are local to this process
    kv: Option<Arc<dyn KvStore>>,
    ttl_ms: i64,
}

impl LimiterManager {
    pub fn new(kv: Option<Arc<dyn KvStore>>) -> LimiterManager {
        LimiterManager {
            buckets: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            kv,
            ttl_ms: DEFAULT_TTL_MS,
        }
    }

    /// Register the default settings used when scoped buckets for `name` are
    /// created dynamically.
    pub fn register_default(&self, name: &str, settings: BucketSettings) {
        self.configs.write().insert(name.to_string(), settings);
    }

    /// Bucket for `(name, scope)`, created from the resolved configuration if
    /// missing. Scope `""` is the global bucket.
    pub async fn get_or_create(&self, name: &str, scope: &str) -> Arc<dyn RateLimiter> {
        if let Some(bucket) = self
            .buckets
            .read()
            .get(name)
            .and_then(|scopes| scopes.get(scope))
        {
            return bucket.clone();
        }

        let settings = self.resolve_settings(name, scope).await;

        let mut buckets = self.buckets.write();
        let scopes = buckets.entry(name.to_string()).or_default();
        if let Some(bucket) = scopes.get(scope) {
            return bucket.clone();
        }
        let bucket: Arc<dyn RateLimiter> = match &self.kv {
            Some(kv) => Arc::new(SharedBucket::new(
                kv.clone(),
                name,
                scope,
                settings.refill_rate,
                settings.capacity,
                self.ttl_ms,
            )),
            None => Arc::new(LocalBucket::new(settings.refill_rate, settings.capacity)),
        };
        scopes.insert(scope.to_string(), bucket.clone());
        bucket
    }

    /// Bucket for `(name, scope)` if it already exists.
    pub fn get(&self, name: &str, scope: &str) -> Option<Arc<dyn RateLimiter>> {
        self.buckets
            .read()
            .get(name)
            .and_then(|scopes| scopes.get(scope))
            .cloned()
    }

    async fn resolve_settings(&self, name: &str, scope: &str) -> BucketSettings {
        if let Some(kv) = &self.kv {
            if let Some(s) = read_override(kv, name, scope).await {
                return s;
            }
            if !scope.is_empty() {
                if let Some(s) = read_override(kv, name, "").await {
                    return s;
                }
            }
        }
        self.configs
            .read()
            .get(name)
            .copied()
            .unwrap_or(DEFAULT_SETTINGS)
    }

    /// Per-scope status for every known bucket.
    pub async fn snapshot_status(&self) -> HashMap<String, HashMap<String, BucketStatus>> {
        let buckets: Vec<(String, String, Arc<dyn RateLimiter>)> = {
            let guard = self.buckets.read();
            guard
                .iter()
                .flat_map(|(name, scopes)| {
                    scopes.iter().map(move |(scope, bucket)| {
                        (name.clone(), scope.clone(), bucket.clone())
                    })
                })
                .collect()
        };

        let mut out: HashMap<String, HashMap<String, BucketStatus>> = HashMap::new();
        for (name, scope, bucket) in buckets {
            let status = bucket.status().await;
            out.entry(name).or_default().insert(scope, status);
        }
        out
    }

    // -- store overrides ----------------------------------------------------

    /// Write a configuration override and drop any cached bucket so the next
    /// `get_or_create` picks it up.
    pub async fn set_override(
        &self,
        name: &str,
        scope: &str,
        settings: BucketSettings,
    ) -> CoreResult<()> {
        if let Some(kv) = &self.kv {
            let key = override_key(name, scope);
            kv.hset(
                &key,
                &[
                    ("refill_rate", settings.refill_rate.to_string()),
                    ("capacity", settings.capacity.to_string()),
                ],
            )
            .await?;
            kv.sadd(CONFIG_INDEX_KEY, &key).await?;
        } else {
            self.configs.write().insert(name.to_string(), settings);
        }
        if let Some(scopes) = self.buckets.write().get_mut(name) {
            scopes.remove(scope);
        }
        Ok(())
    }

    pub async fn get_override(&self, name: &str, scope: &str) -> Option<BucketSettings> {
        let kv = self.kv.as_ref()?;
        read_override(kv, name, scope).await
    }

    pub async fn delete_override(&self, name: &str, scope: &str) -> CoreResult<()> {
        if let Some(kv) = &self.kv {
            let key = override_key(name, scope);
            kv.del(&key).await?;
            kv.srem(CONFIG_INDEX_KEY, &key).await?;
        }
        if let Some(scopes) = self.buckets.write().get_mut(name) {
            scopes.remove(scope);
        }
        Ok(())
    }

    pub async fn list_overrides(&self) -> CoreResult<Vec<String>> {
        match &self.kv {
            Some(kv) => Ok(kv.smembers(CONFIG_INDEX_KEY).await?),
            None => Ok(Vec::new()),
        }
    }
}

fn override_key(name: &str, scope: &str) -> String {
    let scope = if scope.is_empty() { "global" } else { scope };
    format!("limiter_config:{}:{}", name, scope)
}

async fn read_override(kv: &Arc<dyn KvStore>, name: &str, scope: &str) -> Option<BucketSettings> {
    let hash = kv.hgetall(&override_key(name, scope)).await.ok()?;
    if hash.is_empty() {
        return None;
    }
    Some(BucketSettings {
        refill_rate: hash.get("refill_rate")?.parse().ok()?,
        capacity: hash.get("capacity")?.parse().ok()?,
    })
}
