//! # ClusterGenie Store
//!
//! Storage abstractions for the control plane:
//!
//! - **Record store**: async repository traits for clusters, droplets, jobs
//!   and metric samples, with in-memory implementations. Relational backends
//!   are external to the core; the abstraction is all the control plane
//!   depends on.
//! - **Key-value store**: the `KvStore` trait with a Redis backend (atomic
//!   scripted operations, per-call deadline) and an in-memory backend with
//!   identical semantics. Autoscale policies, deployments and provider
//!   capacity live here, as does the shared token-bucket state.

pub mod kv;
pub mod kv_repos;
pub mod memory;
pub mod redis_kv;
pub mod repository;

pub use kv::{KvStore, MemoryKv, TokenTake};
pub use kv_repos::{KvDeploymentRepository, KvPolicyRepository, KvProviderRepository};
pub use memory::{
    MemoryClusterRepository, MemoryDropletRepository, MemoryJobRepository, MemoryMetricRepository,
};
pub use redis_kv::RedisKv;
pub use repository::*;
