//! Monitoring service.
//!
//! Serves metric reads (backfilling an hour of demo samples when a cluster
//! has nothing recent) and aggregates a health snapshot from the latest
//! samples: cpu above 80 degrades to warning, memory above 85 or disk above
//! 90 to critical. Severity never downgrades while scanning.

use chrono::{Duration as ChronoDuration, Utc};
use clustergenie_core::errors::CoreResult;
use clustergenie_core::models::*;
use clustergenie_store::MetricRepository;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

pub struct MonitoringService {
    metric_repo: Arc<dyn MetricRepository>,
}

impl MonitoringService {
    pub fn new(metric_repo: Arc<dyn MetricRepository>) -> MonitoringService {
        MonitoringService { metric_repo }
    }

    pub async fn get_metrics(&self, req: &GetMetricsRequest) -> CoreResult<GetMetricsResponse> {
        if !req.cluster_id.is_empty() {
            self.generate_mock_metrics_if_needed(&req.cluster_id).await?;
        }
        self.metric_repo.get_metrics(req).await
    }

    pub async fn record_metric(&self, metric: Metric) -> CoreResult<()> {
        self.metric_repo.create(metric).await
    }

    pub async fn delete_metrics(
        &self,
        req: &DeleteMetricsRequest,
    ) -> CoreResult<DeleteMetricsResponse> {
        self.metric_repo.delete_metrics(req).await
    }

    pub async fn health_check(&self, cluster_id: &str) -> CoreResult<HealthCheckResponse> {
        let metrics = self
            .get_metrics(&GetMetricsRequest {
                cluster_id: cluster_id.to_string(),
                ..Default::default()
            })
            .await?;

        let mut status = ClusterStatus::Healthy;
        let mut issues = Vec::new();
        let mut escalate = |status: &mut ClusterStatus, to: ClusterStatus| {
            if to.severity() > status.severity() {
                *status = to;
            }
        };

        for metric in &metrics.metrics {
            match metric.metric_type.as_str() {
                "cpu" if metric.value > 80.0 => {
                    escalate(&mut status, ClusterStatus::Warning);
                    issues.push("High CPU usage detected".to_string());
                }
                "memory" if metric.value > 85.0 => {
                    escalate(&mut status, ClusterStatus::Critical);
                    issues.push("High memory usage detected".to_string());
                }
                "disk" if metric.value > 90.0 => {
                    escalate(&mut status, ClusterStatus::Critical);
                    issues.push("Low disk space".to_string());
                }
                _ => {}
            }
        }

        Ok(HealthCheckResponse {
            cluster_id: cluster_id.to_string(),
            status,
            issues,
            timestamp: Utc::now(),
        })
    }

    async fn generate_mock_metrics_if_needed(&self, cluster_id: &str) -> CoreResult<()> {
        if self.metric_repo.has_recent(cluster_id).await? {
            return Ok(());
        }
        debug!(cluster_id = %cluster_id, "backfilling demo metrics");
        self.generate_mock_metrics(cluster_id).await
    }

    /// One sample per minute per type for the past hour, in the demo ranges.
    async fn generate_mock_metrics(&self, cluster_id: &str) -> CoreResult<()> {
        let now = Utc::now();
        for minute in 0..60 {
            let timestamp = now - ChronoDuration::minutes(minute);
            for metric_type in ["cpu", "memory", "disk", "network"] {
                let value = {
                    let mut rng = rand::thread_rng();
                    match metric_type {
                        "cpu" => 10.0 + rng.gen::<f64>() * 60.0,
                        "memory" => 20.0 + rng.gen::<f64>() * 60.0,
                        "disk" => 5.0 + rng.gen::<f64>() * 20.0,
                        _ => rng.gen::<f64>() * 100.0,
                    }
                };
                self.metric_repo
                    .create(Metric {
                        id: format!(
                            "{}-{}-{}",
                            cluster_id,
                            metric_type,
                            timestamp.format("%Y%m%d%H%M%S")
                        ),
                        cluster_id: cluster_id.to_string(),
                        metric_type: metric_type.to_string(),
                        value,
                        timestamp,
                        unit: unit_for(metric_type).to_string(),
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

fn unit_for(metric_type: &str) -> &'static str {
    match metric_type {
        "cpu" | "memory" | "disk" => "%",
        "network" => "Mbps",
        _ => "",
    }
}
