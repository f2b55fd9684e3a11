//! Redis-backed `KvStore`.
//!
//! The token-bucket take and the floored decrement are single server-evaluated
//! Lua scripts so refill-and-deduct stays indivisible across instances. Every
//! call carries a 5 second deadline; callers treat timeouts like any other
//! store failure (the limiter denies on them).

use crate::kv::{KvStore, TokenTake};
use async_trait::async_trait;
use clustergenie_core::errors::StoreError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;

const CALL_DEADLINE: Duration = Duration::from_secs(5);

const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
local last = tonumber(redis.call('HGET', KEYS[1], 'last'))
local capacity = tonumber(ARGV[1])
local refill = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local n = tonumber(ARGV[4])
local ttl_ms = tonumber(ARGV[5])
if tokens == nil then tokens = capacity end
if last == nil then last = now_ms end
local elapsed = (now_ms - last) / 1000.0
if elapsed < 0 then elapsed = 0 end
tokens = tokens + elapsed * refill
if tokens > capacity then tokens = capacity end
if tokens >= n then
  tokens = tokens - n
  redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last', tostring(now_ms))
  redis.call('PEXPIRE', KEYS[1], ttl_ms)
  return {1, tostring(tokens)}
end
return {0, tostring(tokens)}
"#;

const DECR_FLOOR_SCRIPT: &str = r#"
local v = redis.call('DECRBY', KEYS[1], ARGV[1])
if v < 0 then
  redis.call('SET', KEYS[1], '0')
  return 0
end
return v
"#;

pub struct RedisKv {
    conn: ConnectionManager,
    take_script: Script,
    decr_script: Script,
}

impl RedisKv {
    pub async fn connect(addr: &str) -> Result<RedisKv, StoreError> {
        let url = if addr.starts_with("redis://") {
            addr.to_string()
        } else {
            format!("redis://{}", addr)
        };
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = deadline(ConnectionManager::new(client)).await??;
        Ok(RedisKv {
            conn,
            take_script: Script::new(TOKEN_BUCKET_SCRIPT),
            decr_script: Script::new(DECR_FLOOR_SCRIPT),
        })
    }
}

async fn deadline<T, F>(fut: F) -> Result<Result<T, StoreError>, StoreError>
where
    F: std::future::Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(CALL_DEADLINE, fut).await {
        Ok(res) => Ok(res.map_err(|e| StoreError::Unavailable(e.to_string()))),
        Err(_) => Err(StoreError::Timeout),
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.get(key)).await?
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.set(key, value)).await?
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.del(key)).await?
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.hgetall(key)).await?
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let items: Vec<(String, String)> = fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.clone()))
            .collect();
        deadline(conn.hset_multiple(key, &items)).await?
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.sadd(key, member)).await?
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.srem(key, member)).await?
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.smembers(key)).await?
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.incr(key, delta)).await?
    }

    async fn decr_floor_zero(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        deadline(self.decr_script.key(key).arg(delta).invoke_async(&mut conn)).await?
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.set(key, value)).await?
    }

    async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        deadline(conn.pexpire(key, ttl_ms)).await?
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
        let mut conn = self.conn.clone();
        let (allowed, tokens): (i64, String) = deadline(
            self.take_script
                .key(key)
                .arg(capacity)
                .arg(refill_rate)
                .arg(now_ms)
                .arg(n)
                .arg(ttl_ms)
                .invoke_async(&mut conn),
        )
        .await??;
        Ok(TokenTake {
            allowed: allowed == 1,
            tokens: tokens.parse().unwrap_or(0.0),
        })
    }
}
