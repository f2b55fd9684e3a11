//! # ClusterGenie Core
//!
//! Domain model and shared infrastructure for the control plane:
//!
//! - **Models**: clusters, droplets, jobs, autoscale policies, providers,
//!   deployments and metric samples, plus the request/response shapes used by
//!   the REST surface.
//! - **Errors**: per-subsystem error types with stable, user-visible messages
//!   that the API layer maps onto HTTP statuses.
//! - **Configuration**: environment-driven settings for the worker pool, the
//!   rate-limit buckets and the external collaborators.
//! - **Metrics**: a single owned Prometheus registry holding every counter,
//!   gauge and histogram the control plane exposes.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;

pub use config::*;
pub use errors::*;
pub use metrics::Metrics;
pub use models::*;
