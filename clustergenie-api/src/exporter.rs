//! Background metric exporters.
//!
//! One task refreshes the worker-pool and limiter gauges from their
//! snapshots every two seconds; another exports the latest stored monitoring
//! sample per (cluster, type) as a gauge so dashboards can plot per-cluster
//! telemetry.

use clustergenie_core::Metrics;
use clustergenie_jobs::JobService;
use clustergenie_limiter::LimiterManager;
use clustergenie_store::{ClusterRepository, MetricRepository};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const GAUGE_REFRESH_PERIOD: Duration = Duration::from_secs(2);

/// Split a bucket scope (`""`, `user:<id>`, `cluster:<id>`) into its label
/// pair.
fn scope_labels(scope: &str) -> (&str, &str) {
    match scope.split_once(':') {
        Some((scope_type, scope_id)) => (scope_type, scope_id),
        None => ("global", ""),
    }
}

pub fn spawn_gauge_refresher(
    metrics: Metrics,
    limiter: Arc<LimiterManager>,
    jobs: Arc<JobService>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let pool = jobs.worker_pool();
            metrics
                .workerpool_queue_length
                .set(pool.queue_length() as i64);
            metrics.workerpool_active_workers.set(pool.active_workers());
            metrics
                .workerpool_worker_count
                .set(pool.worker_count() as i64);

            for (name, scopes) in limiter.snapshot_status().await {
                for (scope, status) in scopes {
                    let (scope_type, scope_id) = scope_labels(&scope);
                    metrics
                        .rate_limit_available
                        .with_label_values(&[&name, scope_type, scope_id])
                        .set(status.available);
                }
            }
        }
    })
}

pub fn spawn_cluster_metrics_exporter(
    metrics: Metrics,
    cluster_repo: Arc<dyn ClusterRepository>,
    metric_repo: Arc<dyn MetricRepository>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            export_once(&metrics, &cluster_repo, &metric_repo).await;
            ticker.tick().await;
        }
    })
}

async fn export_once(
    metrics: &Metrics,
    cluster_repo: &Arc<dyn ClusterRepository>,
    metric_repo: &Arc<dyn MetricRepository>,
) {
    let clusters = match cluster_repo.list().await {
        Ok(clusters) => clusters,
        Err(e) => {
            warn!("cluster metrics exporter: failed to list clusters: {}", e);
            return;
        }
    };

    for cluster in clusters {
        let samples = match metric_repo.list_by_cluster(&cluster.id).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(
                    cluster_id = %cluster.id,
                    "cluster metrics exporter: failed to list metrics: {}",
                    e
                );
                continue;
            }
        };

        // latest sample per type wins
        let mut latest: HashMap<String, &clustergenie_core::models::Metric> = HashMap::new();
        for sample in &samples {
            match latest.get(&sample.metric_type) {
                Some(existing) if existing.timestamp >= sample.timestamp => {}
                _ => {
                    latest.insert(sample.metric_type.clone(), sample);
                }
            }
        }

        for sample in latest.values() {
            metrics
                .cluster_metric_value
                .with_label_values(&[&sample.cluster_id, &sample.metric_type, &sample.unit])
                .set(sample.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_labels_split_the_tenant_axis() {
        assert_eq!(scope_labels(""), ("global", ""));
        assert_eq!(scope_labels("user:bob"), ("user", "bob"));
        assert_eq!(scope_labels("cluster:c1"), ("cluster", "c1"));
    }
}
