//! # ClusterGenie API
//!
//! The REST surface of the control plane (`/api/v1`), its rate-limit and
//! metrics middleware, observability endpoints, and the background tasks
//! that keep gauges fresh.

pub mod error;
pub mod exporter;
pub mod middleware;
pub mod observability;
pub mod rest;

pub use error::ApiError;
pub use rest::{router, AppState};
