//! Environment-driven configuration.
//!
//! Every setting has a default so the server boots with no environment at
//! all; external collaborators (Kafka, Redis, record store DSN) fall back to
//! in-process substitutes when unset.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;

/// Tenant axis a rate-limit bucket is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    Global,
    User,
    Cluster,
}

impl ScopeMode {
    fn from_env(var: &str) -> ScopeMode {
        match env::var(var).unwrap_or_default().to_lowercase().as_str() {
            "user" => ScopeMode::User,
            "cluster" => ScopeMode::Cluster,
            _ => ScopeMode::Global,
        }
    }
}

/// Rate/capacity pair for a named bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketSettings {
    pub refill_rate: f64,
    pub capacity: f64,
}

/// Top-level configuration assembled from `CLUSTERGENIE_*` environment
/// variables.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Socket the REST API binds to.
    pub bind: SocketAddr,
    /// Durable-log broker list; `None` selects the in-process event bus.
    pub kafka_brokers: Option<Vec<String>>,
    /// Key-value store address; `None` selects the in-memory store.
    pub redis_addr: Option<String>,
    /// Record store DSN. Recognized for parity with deployments that attach a
    /// relational store; this build keeps records in memory.
    pub database_dsn: Option<String>,
    pub worker_count: usize,
    pub worker_queue: usize,
    pub diagnosis_bucket: BucketSettings,
    pub diagnosis_scope: ScopeMode,
    pub jobs_bucket: BucketSettings,
    pub jobs_scope: ScopeMode,
}

impl CoreConfig {
    pub fn from_env() -> CoreConfig {
        CoreConfig {
            bind: parse_env("CLUSTERGENIE_BIND", ([0, 0, 0, 0], 8080).into()),
            kafka_brokers: env::var("CLUSTERGENIE_KAFKA_BROKERS").ok().map(|v| {
                v.split(',')
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect()
            }),
            redis_addr: env::var("CLUSTERGENIE_REDIS_ADDR").ok(),
            database_dsn: env::var("CLUSTERGENIE_DATABASE_DSN").ok(),
            worker_count: parse_env("CLUSTERGENIE_WORKER_COUNT", 4),
            worker_queue: parse_env("CLUSTERGENIE_WORKER_QUEUE", 100),
            diagnosis_bucket: BucketSettings {
                refill_rate: parse_env("CLUSTERGENIE_DIAG_RATE", 0.2),
                capacity: parse_env("CLUSTERGENIE_DIAG_CAP", 5.0),
            },
            diagnosis_scope: ScopeMode::from_env("CLUSTERGENIE_DIAG_SCOPE"),
            jobs_bucket: BucketSettings {
                refill_rate: parse_env("CLUSTERGENIE_JOBS_RATE", 1.0),
                capacity: parse_env("CLUSTERGENIE_JOBS_CAP", 10.0),
            },
            jobs_scope: ScopeMode::from_env("CLUSTERGENIE_JOBS_SCOPE"),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            bind: ([0, 0, 0, 0], 8080).into(),
            kafka_brokers: None,
            redis_addr: None,
            database_dsn: None,
            worker_count: 4,
            worker_queue: 100,
            diagnosis_bucket: BucketSettings {
                refill_rate: 0.2,
                capacity: 5.0,
            },
            diagnosis_scope: ScopeMode::Global,
            jobs_bucket: BucketSettings {
                refill_rate: 1.0,
                capacity: 10.0,
            },
            jobs_scope: ScopeMode::Global,
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.worker_queue, 100);
        assert_eq!(cfg.diagnosis_scope, ScopeMode::Global);
        assert!((cfg.diagnosis_bucket.refill_rate - 0.2).abs() < f64::EPSILON);
    }
}
