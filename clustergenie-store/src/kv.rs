//! Key-value store abstraction.
//!
//! The control plane needs a small surface from its sidestore: strings,
//! hashes, sets, counters with atomic arithmetic, TTLs, and one scripted
//! operation (the token-bucket refill-and-deduct, which must be indivisible).
//! `MemoryKv` implements the same semantics under a single mutex; it is
//! per-instance only and backs tests and broker-less deployments.

use async_trait::async_trait;
use clustergenie_core::errors::StoreError;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// Outcome of an atomic token-bucket take.
#[derive(Debug, Clone, Copy)]
pub struct TokenTake {
    pub allowed: bool,
    pub tokens: f64,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;
    /// Atomic decrement that never takes the counter below zero.
    async fn decr_floor_zero(&self, key: &str, delta: i64) -> Result<i64, StoreError>;
    async fn set_i64(&self, key: &str, value: i64) -> Result<(), StoreError>;
    async fn get_i64(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<(), StoreError>;

    /// Atomic refill-and-deduct on the bucket hash at `key` (fields `tokens`
    /// and `last`). Writes back and refreshes the TTL only when tokens are
    /// consumed.
    async fn token_bucket_take(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        now_ms: i64,
        n: f64,
        ttl_ms: i64,
    ) -> Result<TokenTake, StoreError>;
}

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
    Int(i64),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(value: Value) -> Entry {
        Entry {
            value,
            expires_at: None,
        }
    }

    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory `KvStore`. All operations run under one mutex, so the scripted
/// semantics hold within a single process.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> MemoryKv {
        MemoryKv::default()
    }
}

fn purge(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries.get(key).is_some_and(|e| e.expired()) {
        entries.remove(key);
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        purge(&mut entries, key);
        Ok(entries.get(key).and_then(|e| match &e.value {
            Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            _ => None,
        }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), Entry::live(Value::Str(value.to_string())));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut entries = self.entries.lock();
        purge(&mut entries, key);
        Ok(match entries.get(key) {
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => h.clone(),
            _ => HashMap::new(),
        })
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        purge(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(Value::Hash(HashMap::new())));
        if let Value::Hash(h) = &mut entry.value {
            for (field, value) in fields {
                h.insert(field.to_string(), value.clone());
            }
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        purge(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(Value::Set(BTreeSet::new())));
        if let Value::Set(s) = &mut entry.value {
            s.insert(member.to_string());
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if let Some(Entry {
            value: Value::Set(s),
            ..
        }) = entries.get_mut(key)
        {
            s.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock();
        purge(&mut entries, key);
        Ok(match entries.get(key) {
            Some(Entry {
                value: Value::Set(s),
                ..
            }) => s.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock();
        purge(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(Value::Int(0)));
        match &mut entry.value {
            Value::Int(i) => {
                *i += delta;
                Ok(*i)
            }
            Value::Str(s) => {
                let next = s.parse::<i64>().unwrap_or(0) + delta;
                entry.value = Value::Int(next);
                Ok(next)
            }
            _ => Ok(0),
        }
    }

    async fn decr_floor_zero(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock();
        purge(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(Value::Int(0)));
        match &mut entry.value {
            Value::Int(i) => {
                *i = (*i - delta).max(0);
                Ok(*i)
            }
            Value::Str(s) => {
                let next = (s.parse::<i64>().unwrap_or(0) - delta).max(0);
                entry.value = Value::Int(next);
                Ok(next)
            }
            _ => Ok(0),
        }
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), Entry::live(Value::Int(value)));
        Ok(())
    }

    async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at =
                Some(Instant::now() + std::time::Duration::from_millis(ttl_ms.max(0) as u64));
        }
        Ok(())
    }

    async fn token_bucket_take(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        now_ms: i64,
        n: f64,
        ttl_ms: i64,
    ) -> Result<TokenTake, StoreError> {
        let mut entries = self.entries.lock();
        purge(&mut entries, key);

        let (mut tokens, last) = match entries.get(key) {
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => (
                h.get("tokens").and_then(|v| v.parse().ok()).unwrap_or(capacity),
                h.get("last").and_then(|v| v.parse().ok()).unwrap_or(now_ms),
            ),
            _ => (capacity, now_ms),
        };

        let elapsed_s = ((now_ms - last) as f64 / 1000.0).max(0.0);
        tokens = (tokens + elapsed_s * refill_rate).min(capacity);

        if tokens >= n {
            tokens -= n;
            let mut hash = HashMap::new();
            hash.insert("tokens".to_string(), tokens.to_string());
            hash.insert("last".to_string(), now_ms.to_string());
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(hash),
                    expires_at: Some(
                        Instant::now() + std::time::Duration::from_millis(ttl_ms.max(0) as u64),
                    ),
                },
            );
            Ok(TokenTake {
                allowed: true,
                tokens,
            })
        } else {
            Ok(TokenTake {
                allowed: false,
                tokens,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_set_roundtrip() {
        let kv = MemoryKv::new();
        kv.hset("h", &[("a", "1".into()), ("b", "2".into())])
            .await
            .unwrap();
        let h = kv.hgetall("h").await.unwrap();
        assert_eq!(h.get("a").map(String::as_str), Some("1"));

        kv.sadd("s", "x").await.unwrap();
        kv.sadd("s", "x").await.unwrap();
        kv.sadd("s", "y").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn counters_floor_at_zero() {
        let kv = MemoryKv::new();
        kv.set_i64("c", 1).await.unwrap();
        assert_eq!(kv.decr_floor_zero("c", 1).await.unwrap(), 0);
        assert_eq!(kv.decr_floor_zero("c", 1).await.unwrap(), 0);
        assert_eq!(kv.incr_by("c", 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn bucket_take_cold_start_consumes_capacity() {
        let kv = MemoryKv::new();
        let now = 1_000_000;
        for _ in 0..3 {
            let take = kv
                .token_bucket_take("limiter:t:", 3.0, 0.0, now, 1.0, 60_000)
                .await
                .unwrap();
            assert!(take.allowed);
        }
        let take = kv
            .token_bucket_take("limiter:t:", 3.0, 0.0, now, 1.0, 60_000)
            .await
            .unwrap();
        assert!(!take.allowed);
    }

    #[tokio::test]
    async fn bucket_refills_with_elapsed_time() {
        let kv = MemoryKv::new();
        let now = 1_000_000;
        assert!(
            kv.token_bucket_take("limiter:r:", 1.0, 2.0, now, 1.0, 60_000)
                .await
                .unwrap()
                .allowed
        );
        assert!(
            !kv.token_bucket_take("limiter:r:", 1.0, 2.0, now, 1.0, 60_000)
                .await
                .unwrap()
                .allowed
        );
        // 600ms later at 2 tokens/s there is more than one token again
        assert!(
            kv.token_bucket_take("limiter:r:", 1.0, 2.0, now + 600, 1.0, 60_000)
                .await
                .unwrap()
                .allowed
        );
    }
}
