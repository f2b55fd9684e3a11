//! Domain entities and REST request/response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named group of droplets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub region: String,
    /// Authoritative membership: ordered droplet ids with set semantics.
    #[serde(default)]
    pub droplets: Vec<String>,
    pub status: ClusterStatus,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Healthy,
    Warning,
    Critical,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Healthy => "healthy",
            ClusterStatus::Warning => "warning",
            ClusterStatus::Critical => "critical",
        }
    }

    /// Severity rank used by health aggregation so a `critical` finding is
    /// never downgraded by a later `warning` sample.
    pub fn severity(&self) -> u8 {
        match self {
            ClusterStatus::Healthy => 0,
            ClusterStatus::Warning => 1,
            ClusterStatus::Critical => 2,
        }
    }
}

/// A compute instance managed by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Droplet {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    pub name: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    pub size: String,
    pub image: String,
    pub status: DropletStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropletStatus {
    Provisioning,
    Active,
    Failed,
}

/// An asynchronous control-plane operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub trace_id: String,
    /// JSON-encoded map<string,string> of caller parameters.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameters: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Provision,
    Diagnose,
    Scale,
    Monitor,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Provision => "provision",
            JobType::Diagnose => "diagnose",
            JobType::Scale => "scale",
            JobType::Monitor => "monitor",
        }
    }

    pub fn parse(s: &str) -> Option<JobType> {
        match s {
            "provision" => Some(JobType::Provision),
            "diagnose" => Some(JobType::Diagnose),
            "scale" => Some(JobType::Scale),
            "monitor" => Some(JobType::Monitor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    /// Terminal: the worker-pool queue was full when the job was created.
    QueuedRejected,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::QueuedRejected => "queued_rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::QueuedRejected
        )
    }
}

/// An autoscaling rule for a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalePolicy {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    #[serde(rename = "type")]
    pub policy_type: PolicyType,
    pub enabled: bool,
    pub min_replicas: u32,
    pub max_replicas: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metric_type: String,
    /// Metric threshold in the 0..1 range (0.8 means 80%).
    #[serde(default)]
    pub metric_trigger: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time_window: String,
    #[serde(default)]
    pub cost_limit: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Metrics,
    TimeOfDay,
    Cost,
}

/// A cloud provider with bounded droplet capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub regions: Vec<String>,
    pub capacity: i64,
    #[serde(default)]
    pub used: i64,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub price_per_hour: f64,
}

impl Provider {
    pub fn remaining(&self) -> i64 {
        self.capacity - self.used
    }
}

/// A simulated rollout of a new version onto a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub cluster_id: String,
    pub version: String,
    pub strategy: DeployStrategy,
    pub target_percent: u32,
    pub status: DeployStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only rollout log.
    #[serde(default)]
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployStrategy {
    Canary,
    BlueGreen,
    Rolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "rolled_out")]
    RolledOut,
    #[serde(rename = "rolled_back")]
    RolledBack,
    #[serde(rename = "failed")]
    Failed,
}

/// One monitoring sample for a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    pub cluster_id: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub unit: String,
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub job: Job,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsRequest {
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub page_size: u64,
    #[serde(default)]
    pub sort_by: String,
    #[serde(default)]
    pub sort_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDropletRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    pub region: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropletResponse {
    pub droplet: Droplet,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDropletsResponse {
    pub droplets: Vec<Droplet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateClusterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub cluster: Cluster,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListClustersResponse {
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleClusterRequest {
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnoseClusterRequest {
    pub cluster_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnoseClusterResponse {
    pub cluster: Cluster,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAutoscalePolicyRequest {
    #[serde(default)]
    pub name: String,
    pub cluster_id: String,
    #[serde(rename = "type")]
    pub policy_type: PolicyType,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_replicas: u32,
    #[serde(default)]
    pub max_replicas: u32,
    #[serde(default)]
    pub metric_type: String,
    #[serde(default)]
    pub metric_trigger: f64,
    #[serde(default)]
    pub time_window: String,
    #[serde(default)]
    pub cost_limit: f64,
}

pub type UpdateAutoscalePolicyRequest = CreateAutoscalePolicyRequest;

/// Result of one autoscaler evaluation pass over a cluster's policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub cluster_id: String,
    pub evaluated: usize,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetMetricsRequest {
    #[serde(default)]
    pub cluster_id: String,
    #[serde(rename = "type", default)]
    pub metric_type: String,
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMetricsResponse {
    pub metrics: Vec<Metric>,
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMetricsRequest {
    #[serde(default)]
    pub cluster_id: String,
    #[serde(rename = "type", default)]
    pub metric_type: String,
    /// 0 deletes every matching sample.
    #[serde(default)]
    pub keep_recent_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMetricsResponse {
    pub deleted_count: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub cluster_id: String,
    pub status: ClusterStatus,
    pub issues: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDeploymentRequest {
    pub cluster_id: String,
    pub version: String,
    pub strategy: DeployStrategy,
    #[serde(default)]
    pub target_percent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProviderRequest {
    pub name: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub capacity: i64,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub price_per_hour: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateDropletRequest {
    pub droplet_id: String,
    pub target_provider: String,
}

/// Per-cluster cost snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub cluster_id: String,
    pub droplet_count: usize,
    pub hourly_cost: String,
    pub monthly_cost: String,
}

/// Generic error wrapper used by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
