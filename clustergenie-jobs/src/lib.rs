//! # ClusterGenie Jobs
//!
//! The request-driven job pipeline:
//!
//! - **Worker pool**: N workers draining a bounded FIFO queue of job ids,
//!   with overflow rejection, snapshot introspection and panic isolation.
//! - **Job service**: CRUD plus lifecycle transitions. `provision` and
//!   `scale` jobs are handed to the orchestrator through a typed
//!   `job_requested` event; `diagnose` and `monitor` run locally with
//!   simulated work.
//! - **Orchestrator**: consumes committed events and drives jobs through
//!   typed progress to completion, calling into provisioning through a narrow
//!   capability interface.

pub mod orchestrator;
pub mod pool;
pub mod service;

pub use orchestrator::{ClusterProvisioner, EventHandler};
pub use pool::{JobHandler, WorkerPool};
pub use service::JobService;
