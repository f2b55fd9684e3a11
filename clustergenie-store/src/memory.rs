//! In-memory record store.
//!
//! DashMap-backed implementations of the repository traits. Cluster
//! membership updates run while holding the entry's shard guard, which
//! serializes concurrent read-modify-writes per cluster.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use clustergenie_core::errors::{CoreResult, JobError, ProvisionError};
use clustergenie_core::models::*;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::repository::{ClusterRepository, DropletRepository, JobRepository, MetricRepository};

#[derive(Default)]
pub struct MemoryClusterRepository {
    clusters: DashMap<String, Cluster>,
}

impl MemoryClusterRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterRepository for MemoryClusterRepository {
    async fn create(&self, mut cluster: Cluster) -> CoreResult<Cluster> {
        if cluster.id.is_empty() {
            cluster.id = format!("cluster-{}", short_id());
        }
        self.clusters.insert(cluster.id.clone(), cluster.clone());
        Ok(cluster)
    }

    async fn get(&self, id: &str) -> CoreResult<Cluster> {
        self.clusters
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| ProvisionError::ClusterNotFound.into())
    }

    async fn list(&self) -> CoreResult<Vec<Cluster>> {
        let mut out: Vec<Cluster> = self.clusters.iter().map(|c| c.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn update(&self, cluster: Cluster) -> CoreResult<Cluster> {
        if !self.clusters.contains_key(&cluster.id) {
            return Err(ProvisionError::ClusterNotFound.into());
        }
        self.clusters.insert(cluster.id.clone(), cluster.clone());
        Ok(cluster)
    }

    async fn delete(&self, id: &str) -> CoreResult<()> {
        self.clusters
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProvisionError::ClusterNotFound.into())
    }

    async fn add_droplet(&self, cluster_id: &str, droplet_id: &str) -> CoreResult<()> {
        let mut entry = self
            .clusters
            .get_mut(cluster_id)
            .ok_or(ProvisionError::ClusterNotFound)?;
        if !entry.droplets.iter().any(|d| d == droplet_id) {
            entry.droplets.push(droplet_id.to_string());
        }
        Ok(())
    }

    async fn remove_droplet(&self, cluster_id: &str, droplet_id: &str) -> CoreResult<()> {
        let mut entry = self
            .clusters
            .get_mut(cluster_id)
            .ok_or(ProvisionError::ClusterNotFound)?;
        entry.droplets.retain(|d| d != droplet_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDropletRepository {
    droplets: DashMap<String, Droplet>,
}

impl MemoryDropletRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DropletRepository for MemoryDropletRepository {
    async fn create(&self, droplet: Droplet) -> CoreResult<Droplet> {
        self.droplets.insert(droplet.id.clone(), droplet.clone());
        Ok(droplet)
    }

    async fn get(&self, id: &str) -> CoreResult<Droplet> {
        self.droplets
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| ProvisionError::DropletNotFound.into())
    }

    async fn list(&self) -> CoreResult<Vec<Droplet>> {
        let mut out: Vec<Droplet> = self.droplets.iter().map(|d| d.clone()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn update(&self, droplet: Droplet) -> CoreResult<Droplet> {
        if !self.droplets.contains_key(&droplet.id) {
            return Err(ProvisionError::DropletNotFound.into());
        }
        self.droplets.insert(droplet.id.clone(), droplet.clone());
        Ok(droplet)
    }

    async fn delete(&self, id: &str) -> CoreResult<()> {
        self.droplets
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProvisionError::DropletNotFound.into())
    }
}

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: DashMap<String, Job>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(
        &self,
        job_type: JobType,
        parameters: &HashMap<String, String>,
    ) -> CoreResult<Job> {
        let parameters = if parameters.is_empty() {
            String::new()
        } else {
            serde_json::to_string(parameters).map_err(clustergenie_core::StoreError::from)?
        };
        let job = Job {
            id: format!("job-{}-{}", job_type.as_str(), short_id()),
            cluster_id: String::new(),
            job_type,
            status: JobStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            completed_at: None,
            result: String::new(),
            error: String::new(),
            trace_id: Uuid::new_v4().to_string(),
            parameters,
        };
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> CoreResult<Job> {
        self.jobs
            .get(id)
            .map(|j| j.clone())
            .ok_or_else(|| JobError::NotFound.into())
    }

    async fn list(&self, req: &ListJobsRequest) -> CoreResult<ListJobsResponse> {
        let page = req.page.max(1);
        let page_size = if req.page_size == 0 { 50 } else { req.page_size };

        let mut jobs: Vec<Job> = self.jobs.iter().map(|j| j.clone()).collect();
        // unknown sort keys fall back to created_at
        match req.sort_by.as_str() {
            "id" => jobs.sort_by(|a, b| a.id.cmp(&b.id)),
            _ => jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))),
        }
        if req.sort_dir != "asc" {
            jobs.reverse();
        }

        let total = jobs.len() as u64;
        let start = ((page - 1) * page_size) as usize;
        let jobs = jobs
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(ListJobsResponse {
            jobs,
            page,
            page_size,
            total_count: total,
        })
    }

    async fn update_status(&self, id: &str, status: JobStatus) -> CoreResult<()> {
        let mut job = self.jobs.get_mut(id).ok_or(JobError::NotFound)?;
        job.status = status;
        if status == JobStatus::Running && job.progress == 0 {
            job.progress = 5;
        }
        if matches!(status, JobStatus::Completed | JobStatus::Failed) {
            job.completed_at = Some(Utc::now());
            job.progress = 100;
        }
        Ok(())
    }

    async fn update_progress(&self, id: &str, progress: u32, message: &str) -> CoreResult<()> {
        let mut job = self.jobs.get_mut(id).ok_or(JobError::NotFound)?;
        job.progress = job.progress.max(progress.min(100));
        if progress >= 100 {
            // a job already marked failed stays failed
            if !matches!(job.status, JobStatus::Failed | JobStatus::QueuedRejected) {
                job.status = JobStatus::Completed;
            }
            if job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
        } else if job.status == JobStatus::Pending {
            job.status = JobStatus::Running;
        }
        if !message.is_empty() {
            job.result = message.to_string();
        }
        Ok(())
    }
}

/// Append-only metric store.
#[derive(Default)]
pub struct MemoryMetricRepository {
    metrics: RwLock<Vec<Metric>>,
}

impl MemoryMetricRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricRepository for MemoryMetricRepository {
    async fn create(&self, metric: Metric) -> CoreResult<()> {
        self.metrics.write().push(metric);
        Ok(())
    }

    async fn get_metrics(&self, req: &GetMetricsRequest) -> CoreResult<GetMetricsResponse> {
        let page = req.page.max(1);
        let page_size = if req.page_size == 0 { 50 } else { req.page_size };

        let mut matching: Vec<Metric> = self
            .metrics
            .read()
            .iter()
            .filter(|m| req.cluster_id.is_empty() || m.cluster_id == req.cluster_id)
            .filter(|m| req.metric_type.is_empty() || m.metric_type == req.metric_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len() as u64;
        let start = ((page - 1) * page_size) as usize;
        let metrics = matching
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(GetMetricsResponse {
            metrics,
            page,
            page_size,
            total_count: total,
        })
    }

    async fn delete_metrics(&self, req: &DeleteMetricsRequest) -> CoreResult<DeleteMetricsResponse> {
        let mut metrics = self.metrics.write();
        let mut matching_idx: Vec<usize> = metrics
            .iter()
            .enumerate()
            .filter(|(_, m)| req.cluster_id.is_empty() || m.cluster_id == req.cluster_id)
            .filter(|(_, m)| req.metric_type.is_empty() || m.metric_type == req.metric_type)
            .map(|(i, _)| i)
            .collect();
        // newest first, keep the requested head
        matching_idx.sort_by(|a, b| metrics[*b].timestamp.cmp(&metrics[*a].timestamp));
        let doomed: Vec<usize> = matching_idx
            .into_iter()
            .skip(req.keep_recent_count as usize)
            .collect();

        let deleted = doomed.len() as u64;
        let doomed: std::collections::HashSet<usize> = doomed.into_iter().collect();
        let mut idx = 0;
        metrics.retain(|_| {
            let drop = doomed.contains(&idx);
            idx += 1;
            !drop
        });

        Ok(DeleteMetricsResponse {
            deleted_count: deleted,
            message: format!("deleted {} metrics", deleted),
        })
    }

    async fn has_recent(&self, cluster_id: &str) -> CoreResult<bool> {
        let cutoff = Utc::now() - Duration::minutes(5);
        Ok(self
            .metrics
            .read()
            .iter()
            .any(|m| m.cluster_id == cluster_id && m.timestamp > cutoff))
    }

    async fn list_by_cluster(&self, cluster_id: &str) -> CoreResult<Vec<Metric>> {
        Ok(self
            .metrics
            .read()
            .iter()
            .filter(|m| m.cluster_id == cluster_id)
            .cloned()
            .collect())
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
