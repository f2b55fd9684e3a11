//! Error types for the control plane.
//!
//! Display strings on the public variants are stable: the REST layer returns
//! them verbatim and the test suites assert them.

use thiserror::Error;

/// Aggregate error type for control-plane operations.
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// Job lifecycle errors
    #[error(transparent)]
    Job(#[from] JobError),

    /// Provisioning errors
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Placement scheduling errors
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Autoscale policy errors
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Deployment simulator errors
    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    /// Record store / key-value store errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Admission errors surfaced by the rate limiter
    #[error("rate limit exceeded")]
    RateLimited,

    /// Generic errors
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Job service errors
#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid job type")]
    InvalidType,

    #[error("job is not in pending status")]
    NotPending,

    #[error("job queue full")]
    QueueFull,

    #[error("job not found")]
    NotFound,

    #[error("invalid job parameters")]
    InvalidParameters,

    #[error("cluster_id required")]
    ClusterIdRequired,
}

/// Provisioning service errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("name and region are required")]
    NameAndRegionRequired,

    #[error("cluster not found")]
    ClusterNotFound,

    #[error("droplet not found")]
    DropletNotFound,

    #[error("no droplets to scale down")]
    NoDropletsToScaleDown,

    #[error("invalid scale action")]
    InvalidScaleAction,
}

/// Placement scheduler errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("no provider capacity available")]
    NoCapacity,

    #[error("name required")]
    NameRequired,

    #[error("provider not found")]
    ProviderNotFound,
}

/// Autoscale policy errors
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("cluster_id required")]
    ClusterIdRequired,

    #[error("policy not found")]
    NotFound,

    #[error("min_replicas must not exceed max_replicas")]
    ReplicaBounds,
}

/// Deployment simulator errors
#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("cluster_id and version required")]
    MissingFields,

    #[error("deployment not found")]
    NotFound,
}

/// Record store and key-value store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for control-plane operations
pub type CoreResult<T> = Result<T, ControlPlaneError>;
