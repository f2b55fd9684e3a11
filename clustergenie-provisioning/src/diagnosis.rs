//! Cluster diagnosis.
//!
//! Local heuristics derive insights and recommendations from cluster status
//! and droplet count. An LLM-backed path existed upstream of this service; it
//! is intentionally not part of the core, and the heuristics are the complete
//! local path.

use clustergenie_core::errors::CoreResult;
use clustergenie_core::models::*;
use clustergenie_store::ClusterRepository;
use std::sync::Arc;

pub struct DiagnosisService {
    cluster_repo: Arc<dyn ClusterRepository>,
}

impl DiagnosisService {
    pub fn new(cluster_repo: Arc<dyn ClusterRepository>) -> DiagnosisService {
        DiagnosisService { cluster_repo }
    }

    pub async fn diagnose(
        &self,
        req: &DiagnoseClusterRequest,
    ) -> CoreResult<DiagnoseClusterResponse> {
        let cluster = self.cluster_repo.get(&req.cluster_id).await?;
        let insights = generate_insights(&cluster);
        let recommendations = generate_recommendations(&cluster);
        Ok(DiagnoseClusterResponse {
            cluster,
            insights,
            recommendations,
        })
    }
}

fn generate_insights(cluster: &Cluster) -> Vec<String> {
    let mut insights = vec![
        format!("Cluster is running with {} droplets", cluster.droplets.len()),
        format!("Region distribution: {}", cluster.region),
    ];
    match cluster.status {
        ClusterStatus::Healthy => insights.push("All systems operational".to_string()),
        ClusterStatus::Warning => {
            insights.push("Some performance degradation detected".to_string())
        }
        ClusterStatus::Critical => {
            insights.push("Critical issues require immediate attention".to_string())
        }
    }
    insights
}

fn generate_recommendations(cluster: &Cluster) -> Vec<String> {
    let mut recommendations = Vec::new();
    let droplet_count = cluster.droplets.len();

    if droplet_count < 2 {
        recommendations
            .push("Add more droplets for better redundancy and load distribution".to_string());
    }
    if droplet_count == 0 {
        recommendations.push("Create initial droplet to get the cluster running".to_string());
    }
    if cluster.status == ClusterStatus::Critical {
        recommendations.push("Immediate scaling required - add droplets to handle load".to_string());
        recommendations.push("Check droplet health and restart failed instances".to_string());
    }
    if cluster.status == ClusterStatus::Warning {
        recommendations.push("Consider upgrading droplet sizes for better performance".to_string());
        recommendations.push("Add monitoring droplets for better observability".to_string());
    }
    if droplet_count > 0 && droplet_count < 5 {
        recommendations.push("Scale up cluster with additional droplets".to_string());
    }
    if recommendations.is_empty() {
        recommendations
            .push("Cluster configuration looks good - regular monitoring recommended".to_string());
    }
    recommendations
}
