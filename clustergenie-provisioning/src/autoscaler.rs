//! Autoscaler policy engine.
//!
//! Policy CRUD plus `evaluate`, which walks a cluster's enabled policies and
//! issues scale actions against live telemetry. A metrics policy scales up
//! when the latest sample reaches `trigger·100` and down below 60% of that
//! mark; a time-of-day policy with a non-empty window is treated as active;
//! cost policies are report-only. Single-policy failures are skipped, never
//! raised.

use async_trait::async_trait;
use chrono::Utc;
use clustergenie_core::errors::{CoreResult, PolicyError};
use clustergenie_core::models::*;
use clustergenie_store::{ClusterRepository, PolicyRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::monitoring::MonitoringService;

/// Narrow capability interface the engine holds on provisioning.
#[async_trait]
pub trait ScalesClusters: Send + Sync {
    async fn scale_cluster(&self, cluster_id: &str, action: &str) -> CoreResult<()>;
}

pub struct AutoscalerService {
    repo: Arc<dyn PolicyRepository>,
    provisioning: Arc<dyn ScalesClusters>,
    monitoring: Arc<MonitoringService>,
}

impl AutoscalerService {
    pub fn new(
        repo: Arc<dyn PolicyRepository>,
        provisioning: Arc<dyn ScalesClusters>,
        monitoring: Arc<MonitoringService>,
    ) -> AutoscalerService {
        AutoscalerService {
            repo,
            provisioning,
            monitoring,
        }
    }

    pub async fn create_policy(
        &self,
        req: &CreateAutoscalePolicyRequest,
    ) -> CoreResult<AutoscalePolicy> {
        if req.cluster_id.is_empty() {
            return Err(PolicyError::ClusterIdRequired.into());
        }
        if req.max_replicas > 0 && req.min_replicas > req.max_replicas {
            return Err(PolicyError::ReplicaBounds.into());
        }
        self.repo
            .create(AutoscalePolicy {
                id: String::new(),
                name: req.name.clone(),
                cluster_id: req.cluster_id.clone(),
                policy_type: req.policy_type,
                enabled: req.enabled,
                min_replicas: req.min_replicas,
                max_replicas: req.max_replicas,
                metric_type: req.metric_type.clone(),
                metric_trigger: req.metric_trigger,
                time_window: req.time_window.clone(),
                cost_limit: req.cost_limit,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
    }

    pub async fn update_policy(
        &self,
        id: &str,
        req: &UpdateAutoscalePolicyRequest,
    ) -> CoreResult<AutoscalePolicy> {
        let mut policy = self.repo.get(id).await?;
        if !req.name.is_empty() {
            policy.name = req.name.clone();
        }
        policy.policy_type = req.policy_type;
        policy.enabled = req.enabled;
        if req.min_replicas > 0 {
            policy.min_replicas = req.min_replicas;
        }
        if req.max_replicas > 0 {
            policy.max_replicas = req.max_replicas;
        }
        if !req.metric_type.is_empty() {
            policy.metric_type = req.metric_type.clone();
        }
        if req.metric_trigger > 0.0 {
            policy.metric_trigger = req.metric_trigger;
        }
        if !req.time_window.is_empty() {
            policy.time_window = req.time_window.clone();
        }
        if req.cost_limit > 0.0 {
            policy.cost_limit = req.cost_limit;
        }
        if policy.max_replicas > 0 && policy.min_replicas > policy.max_replicas {
            return Err(PolicyError::ReplicaBounds.into());
        }
        self.repo.update(policy).await
    }

    pub async fn get_policy(&self, id: &str) -> CoreResult<AutoscalePolicy> {
        self.repo.get(id).await
    }

    pub async fn list_policies(&self, cluster_id: &str) -> CoreResult<Vec<AutoscalePolicy>> {
        self.repo.list(cluster_id).await
    }

    pub async fn delete_policy(&self, id: &str) -> CoreResult<()> {
        self.repo.delete(id).await
    }

    /// Evaluate every enabled policy targeting `cluster_id` and apply the
    /// resulting scale actions.
    pub async fn evaluate(&self, cluster_id: &str) -> CoreResult<EvaluationReport> {
        if cluster_id.is_empty() {
            return Err(PolicyError::ClusterIdRequired.into());
        }
        let policies = self.repo.list(cluster_id).await?;
        let evaluated = policies.len();
        let mut actions = Vec::new();

        for policy in policies.into_iter().filter(|p| p.enabled) {
            match policy.policy_type {
                PolicyType::Metrics => {
                    let resp = match self
                        .monitoring
                        .get_metrics(&GetMetricsRequest {
                            cluster_id: cluster_id.to_string(),
                            metric_type: policy.metric_type.clone(),
                            page: 1,
                            page_size: 1,
                        })
                        .await
                    {
                        Ok(resp) => resp,
                        Err(_) => continue,
                    };
                    let Some(latest) = resp.metrics.first() else {
                        continue;
                    };
                    // metric values are percentages for cpu/memory
                    let trigger = policy.metric_trigger * 100.0;
                    if latest.value >= trigger {
                        if self
                            .provisioning
                            .scale_cluster(cluster_id, "scale_up")
                            .await
                            .is_ok()
                        {
                            actions.push(format!(
                                "policy:{} -> scale_up (metric {} {:.2} >= trigger {:.2})",
                                policy.id, policy.metric_type, latest.value, trigger
                            ));
                        }
                    } else if latest.value <= trigger * 0.6 {
                        if self
                            .provisioning
                            .scale_cluster(cluster_id, "scale_down")
                            .await
                            .is_ok()
                        {
                            actions.push(format!(
                                "policy:{} -> scale_down (metric {} {:.2} <= lowmark)",
                                policy.id, policy.metric_type, latest.value
                            ));
                        }
                    }
                }
                PolicyType::TimeOfDay => {
                    // any non-empty window counts as active
                    if !policy.time_window.is_empty()
                        && self
                            .provisioning
                            .scale_cluster(cluster_id, "scale_up")
                            .await
                            .is_ok()
                    {
                        actions.push(format!(
                            "policy:{} -> scale_up (time_of_day {} @ {})",
                            policy.id,
                            policy.time_window,
                            Utc::now().format("%H:%M")
                        ));
                    }
                }
                PolicyType::Cost => {
                    if policy.cost_limit > 0.0 {
                        actions.push(format!(
                            "policy:{} -> cost_limit_check (limit={:.2})",
                            policy.id, policy.cost_limit
                        ));
                    }
                }
            }
        }

        Ok(EvaluationReport {
            cluster_id: cluster_id.to_string(),
            evaluated,
            actions,
        })
    }

    /// Periodic engine: evaluate every cluster that has policies on a fixed
    /// interval.
    pub fn spawn_engine(
        self: &Arc<Self>,
        clusters: Arc<dyn ClusterRepository>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let cluster_ids = match clusters.list().await {
                    Ok(list) => list.into_iter().map(|c| c.id).collect::<Vec<_>>(),
                    Err(e) => {
                        error!("autoscaler engine failed to list clusters: {}", e);
                        continue;
                    }
                };
                for cluster_id in cluster_ids {
                    match engine.evaluate(&cluster_id).await {
                        Ok(report) if !report.actions.is_empty() => {
                            info!(
                                cluster_id = %cluster_id,
                                "autoscaler applied {} action(s)",
                                report.actions.len()
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(cluster_id = %cluster_id, "evaluation failed: {}", e),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustergenie_store::{KvPolicyRepository, MemoryKv, MemoryMetricRepository, MetricRepository};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingScaler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScalesClusters for CountingScaler {
        async fn scale_cluster(&self, _cluster_id: &str, action: &str) -> CoreResult<()> {
            self.calls.lock().push(action.to_string());
            Ok(())
        }
    }

    struct Fixture {
        service: AutoscalerService,
        scaler: Arc<CountingScaler>,
        metrics: Arc<MemoryMetricRepository>,
    }

    fn fixture() -> Fixture {
        let scaler = Arc::new(CountingScaler::default());
        let metrics = Arc::new(MemoryMetricRepository::new());
        let service = AutoscalerService::new(
            Arc::new(KvPolicyRepository::new(Arc::new(MemoryKv::new()))),
            scaler.clone(),
            Arc::new(MonitoringService::new(metrics.clone())),
        );
        Fixture {
            service,
            scaler,
            metrics,
        }
    }

    fn metrics_policy(cluster: &str, trigger: f64) -> CreateAutoscalePolicyRequest {
        CreateAutoscalePolicyRequest {
            name: "cpu-high".into(),
            cluster_id: cluster.into(),
            policy_type: PolicyType::Metrics,
            enabled: true,
            min_replicas: 1,
            max_replicas: 5,
            metric_type: "cpu".into(),
            metric_trigger: trigger,
            time_window: String::new(),
            cost_limit: 0.0,
        }
    }

    async fn seed_cpu(metrics: &Arc<MemoryMetricRepository>, cluster: &str, value: f64) {
        metrics
            .create(Metric {
                id: format!("{}-cpu-seed", cluster),
                cluster_id: cluster.to_string(),
                metric_type: "cpu".to_string(),
                value,
                timestamp: Utc::now(),
                unit: "%".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_requires_cluster_and_sane_bounds() {
        let f = fixture();
        let mut req = metrics_policy("", 0.8);
        let err = f.service.create_policy(&req).await.unwrap_err();
        assert_eq!(err.to_string(), "cluster_id required");

        req.cluster_id = "c1".into();
        req.min_replicas = 9;
        let err = f.service.create_policy(&req).await.unwrap_err();
        assert_eq!(err.to_string(), "min_replicas must not exceed max_replicas");
    }

    #[tokio::test]
    async fn high_sample_scales_up() {
        let f = fixture();
        f.service
            .create_policy(&metrics_policy("c1", 0.8))
            .await
            .unwrap();
        seed_cpu(&f.metrics, "c1", 95.0).await;

        let report = f.service.evaluate("c1").await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.actions.len(), 1);
        assert!(report.actions[0].contains("scale_up"));
        assert_eq!(f.scaler.calls.lock().as_slice(), &["scale_up".to_string()]);
    }

    #[tokio::test]
    async fn low_sample_scales_down() {
        let f = fixture();
        f.service
            .create_policy(&metrics_policy("c1", 0.8))
            .await
            .unwrap();
        seed_cpu(&f.metrics, "c1", 40.0).await;

        let report = f.service.evaluate("c1").await.unwrap();
        assert_eq!(report.actions.len(), 1);
        assert!(report.actions[0].contains("scale_down"));
    }

    #[tokio::test]
    async fn mid_range_sample_takes_no_action() {
        let f = fixture();
        f.service
            .create_policy(&metrics_policy("c1", 0.8))
            .await
            .unwrap();
        seed_cpu(&f.metrics, "c1", 70.0).await;

        let report = f.service.evaluate("c1").await.unwrap();
        assert!(report.actions.is_empty());
        assert!(f.scaler.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn disabled_policies_are_skipped() {
        let f = fixture();
        let mut req = metrics_policy("c1", 0.8);
        req.enabled = false;
        f.service.create_policy(&req).await.unwrap();
        seed_cpu(&f.metrics, "c1", 95.0).await;

        let report = f.service.evaluate("c1").await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert!(report.actions.is_empty());
    }

    #[tokio::test]
    async fn time_of_day_with_window_is_always_active() {
        let f = fixture();
        f.service
            .create_policy(&CreateAutoscalePolicyRequest {
                name: "office-hours".into(),
                cluster_id: "c1".into(),
                policy_type: PolicyType::TimeOfDay,
                enabled: true,
                min_replicas: 1,
                max_replicas: 4,
                metric_type: String::new(),
                metric_trigger: 0.0,
                time_window: "09:00-18:00".into(),
                cost_limit: 0.0,
            })
            .await
            .unwrap();

        let report = f.service.evaluate("c1").await.unwrap();
        assert_eq!(report.actions.len(), 1);
        assert!(report.actions[0].contains("time_of_day"));
    }

    #[tokio::test]
    async fn cost_policy_is_report_only() {
        let f = fixture();
        f.service
            .create_policy(&CreateAutoscalePolicyRequest {
                name: "budget".into(),
                cluster_id: "c1".into(),
                policy_type: PolicyType::Cost,
                enabled: true,
                min_replicas: 0,
                max_replicas: 0,
                metric_type: String::new(),
                metric_trigger: 0.0,
                time_window: String::new(),
                cost_limit: 120.0,
            })
            .await
            .unwrap();

        let report = f.service.evaluate("c1").await.unwrap();
        assert_eq!(report.actions.len(), 1);
        assert!(report.actions[0].contains("cost_limit_check"));
        assert!(f.scaler.calls.lock().is_empty(), "cost must not scale");
    }
}
