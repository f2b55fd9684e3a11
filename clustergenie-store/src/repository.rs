//! Record store repository traits.
//!
//! One trait per entity, mirroring the narrow interfaces the services are
//! wired against. Implementations own id generation and lifecycle fields so
//! the services stay storage-agnostic.

use async_trait::async_trait;
use clustergenie_core::errors::CoreResult;
use clustergenie_core::models::*;
use std::collections::HashMap;

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn create(&self, cluster: Cluster) -> CoreResult<Cluster>;
    async fn get(&self, id: &str) -> CoreResult<Cluster>;
    async fn list(&self) -> CoreResult<Vec<Cluster>>;
    async fn update(&self, cluster: Cluster) -> CoreResult<Cluster>;
    async fn delete(&self, id: &str) -> CoreResult<()>;

    /// Set-semantic append to the cluster's membership list. Concurrent calls
    /// for the same cluster are serialized by the store.
    async fn add_droplet(&self, cluster_id: &str, droplet_id: &str) -> CoreResult<()>;
    async fn remove_droplet(&self, cluster_id: &str, droplet_id: &str) -> CoreResult<()>;
}

#[async_trait]
pub trait DropletRepository: Send + Sync {
    async fn create(&self, droplet: Droplet) -> CoreResult<Droplet>;
    async fn get(&self, id: &str) -> CoreResult<Droplet>;
    async fn list(&self) -> CoreResult<Vec<Droplet>>;
    async fn update(&self, droplet: Droplet) -> CoreResult<Droplet>;
    async fn delete(&self, id: &str) -> CoreResult<()>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new job in `pending` with a fresh trace id.
    async fn create(
        &self,
        job_type: JobType,
        parameters: &HashMap<String, String>,
    ) -> CoreResult<Job>;
    async fn get(&self, id: &str) -> CoreResult<Job>;
    async fn list(&self, req: &ListJobsRequest) -> CoreResult<ListJobsResponse>;
    async fn update_status(&self, id: &str, status: JobStatus) -> CoreResult<()>;
    /// Raise progress (never lowers it); `progress >= 100` completes the job,
    /// a non-empty message replaces the result.
    async fn update_progress(&self, id: &str, progress: u32, message: &str) -> CoreResult<()>;
}

#[async_trait]
pub trait MetricRepository: Send + Sync {
    async fn create(&self, metric: Metric) -> CoreResult<()>;
    async fn get_metrics(&self, req: &GetMetricsRequest) -> CoreResult<GetMetricsResponse>;
    async fn delete_metrics(&self, req: &DeleteMetricsRequest) -> CoreResult<DeleteMetricsResponse>;
    /// Whether the cluster has any sample newer than five minutes.
    async fn has_recent(&self, cluster_id: &str) -> CoreResult<bool>;
    async fn list_by_cluster(&self, cluster_id: &str) -> CoreResult<Vec<Metric>>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn create(&self, policy: AutoscalePolicy) -> CoreResult<AutoscalePolicy>;
    async fn get(&self, id: &str) -> CoreResult<AutoscalePolicy>;
    async fn list(&self, cluster_id: &str) -> CoreResult<Vec<AutoscalePolicy>>;
    async fn update(&self, policy: AutoscalePolicy) -> CoreResult<AutoscalePolicy>;
    async fn delete(&self, id: &str) -> CoreResult<()>;
}

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn create(&self, deployment: Deployment) -> CoreResult<Deployment>;
    async fn get(&self, id: &str) -> CoreResult<Deployment>;
    async fn list(&self, cluster_id: Option<&str>) -> CoreResult<Vec<Deployment>>;
    async fn update(&self, deployment: Deployment) -> CoreResult<Deployment>;
}

#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn create(&self, provider: Provider) -> CoreResult<Provider>;
    async fn get(&self, id: &str) -> CoreResult<Provider>;
    async fn get_by_name(&self, name: &str) -> CoreResult<Option<Provider>>;
    async fn list(&self) -> CoreResult<Vec<Provider>>;
    /// Update the provider's static fields; `used` is adjusted atomically via
    /// [`ProviderRepository::adjust_used`].
    async fn update(&self, provider: Provider) -> CoreResult<Provider>;
    /// Atomically add `delta` to the provider's used counter. Negative deltas
    /// floor at zero. Returns the new value.
    async fn adjust_used(&self, id: &str, delta: i64) -> CoreResult<i64>;
}
