//! Cluster service.
//!
//! All cluster mutations flow through here; membership updates delegate to
//! the repository's set-semantic primitives so concurrent droplet creation
//! cannot produce duplicates.

use chrono::Utc;
use clustergenie_core::errors::CoreResult;
use clustergenie_core::models::*;
use clustergenie_store::ClusterRepository;
use std::sync::Arc;

pub struct ClusterService {
    repo: Arc<dyn ClusterRepository>,
}

impl ClusterService {
    pub fn new(repo: Arc<dyn ClusterRepository>) -> ClusterService {
        ClusterService { repo }
    }

    pub async fn create(&self, req: &CreateClusterRequest) -> CoreResult<ClusterResponse> {
        let cluster = self
            .repo
            .create(Cluster {
                id: String::new(),
                name: req.name.clone(),
                region: req.region.clone(),
                droplets: Vec::new(),
                status: ClusterStatus::Healthy,
                last_checked: Utc::now(),
            })
            .await?;
        Ok(ClusterResponse {
            cluster,
            message: "Cluster created successfully".to_string(),
        })
    }

    pub async fn get(&self, id: &str) -> CoreResult<Cluster> {
        self.repo.get(id).await
    }

    pub async fn list(&self) -> CoreResult<Vec<Cluster>> {
        self.repo.list().await
    }

    pub async fn update(&self, id: &str, req: &UpdateClusterRequest) -> CoreResult<ClusterResponse> {
        let mut cluster = self.repo.get(id).await?;
        if !req.name.is_empty() {
            cluster.name = req.name.clone();
        }
        if !req.region.is_empty() {
            cluster.region = req.region.clone();
        }
        if let Some(status) = req.status {
            cluster.status = status;
        }
        let cluster = self.repo.update(cluster).await?;
        Ok(ClusterResponse {
            cluster,
            message: "Cluster updated successfully".to_string(),
        })
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        self.repo.delete(id).await
    }

    pub async fn add_droplet_to_cluster(
        &self,
        cluster_id: &str,
        droplet_id: &str,
    ) -> CoreResult<()> {
        self.repo.add_droplet(cluster_id, droplet_id).await
    }

    pub async fn remove_droplet_from_cluster(
        &self,
        cluster_id: &str,
        droplet_id: &str,
    ) -> CoreResult<()> {
        self.repo.remove_droplet(cluster_id, droplet_id).await
    }
}
