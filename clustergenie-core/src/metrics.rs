//! Prometheus instrumentation for the control plane.
//!
//! One owned registry is built at startup and handed to the components that
//! record samples; registration happens exactly once. The exposition text is
//! served by the API layer under `/metrics`.

use anyhow::Result;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Owned Prometheus registry plus every metric the control plane records.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Requests rejected by the rate limiter, per bucket and scope.
    pub rate_limit_exceeded: CounterVec,
    /// Available tokens per bucket and scope.
    pub rate_limit_available: GaugeVec,

    pub workerpool_queue_length: IntGauge,
    pub workerpool_active_workers: IntGauge,
    pub workerpool_worker_count: IntGauge,

    /// Jobs processed by type and terminal classification.
    pub jobs_processed: CounterVec,
    /// Job processing duration by type and terminal classification.
    pub job_processing_seconds: HistogramVec,

    pub http_requests_total: CounterVec,
    pub http_request_duration_seconds: HistogramVec,

    /// Latest monitoring sample per cluster and metric type.
    pub cluster_metric_value: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Metrics> {
        let registry = Registry::new();

        let rate_limit_exceeded = CounterVec::new(
            Opts::new(
                "clustergenie_rate_limit_exceeded_total",
                "Total number of requests rejected by rate limiter",
            ),
            &["endpoint", "scope_type", "scope_id"],
        )?;

        let rate_limit_available = GaugeVec::new(
            Opts::new(
                "clustergenie_rate_limit_available_tokens",
                "Available tokens in token buckets",
            ),
            &["endpoint", "scope_type", "scope_id"],
        )?;

        let workerpool_queue_length = IntGauge::new(
            "clustergenie_workerpool_queue_length",
            "Current length of the job worker pool queue",
        )?;
        let workerpool_active_workers = IntGauge::new(
            "clustergenie_workerpool_active_workers",
            "Number of workers currently processing jobs",
        )?;
        let workerpool_worker_count = IntGauge::new(
            "clustergenie_workerpool_worker_count",
            "Configured number of workers in the pool",
        )?;

        let jobs_processed = CounterVec::new(
            Opts::new(
                "clustergenie_jobs_processed_total",
                "Jobs processed by type and status",
            ),
            &["job_type", "status"],
        )?;

        let job_processing_seconds = HistogramVec::new(
            HistogramOpts::new(
                "clustergenie_job_processing_seconds",
                "Job processing duration in seconds",
            )
            .buckets(vec![
                0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ]),
            &["job_type", "status"],
        )?;

        let http_requests_total = CounterVec::new(
            Opts::new("clustergenie_http_requests_total", "HTTP requests served"),
            &["method", "path", "status"],
        )?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "clustergenie_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0,
            ]),
            &["method", "path", "status"],
        )?;

        let cluster_metric_value = GaugeVec::new(
            Opts::new(
                "clustergenie_cluster_metric_value",
                "Latest monitoring sample per cluster and metric type",
            ),
            &["cluster_id", "metric_type", "unit"],
        )?;

        registry.register(Box::new(rate_limit_exceeded.clone()))?;
        registry.register(Box::new(rate_limit_available.clone()))?;
        registry.register(Box::new(workerpool_queue_length.clone()))?;
        registry.register(Box::new(workerpool_active_workers.clone()))?;
        registry.register(Box::new(workerpool_worker_count.clone()))?;
        registry.register(Box::new(jobs_processed.clone()))?;
        registry.register(Box::new(job_processing_seconds.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(cluster_metric_value.clone()))?;

        Ok(Metrics {
            registry,
            rate_limit_exceeded,
            rate_limit_available,
            workerpool_queue_length,
            workerpool_active_workers,
            workerpool_worker_count,
            jobs_processed,
            job_processing_seconds,
            http_requests_total,
            http_request_duration_seconds,
            cluster_metric_value,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::error!("failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    /// Current value of a labelled counter, for tests and introspection.
    pub fn jobs_processed_count(&self, job_type: &str, status: &str) -> f64 {
        self.jobs_processed
            .with_label_values(&[job_type, status])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_and_renders() {
        let metrics = Metrics::new().unwrap();
        metrics
            .jobs_processed
            .with_label_values(&["scale", "completed"])
            .inc();
        let text = metrics.render();
        assert!(text.contains("clustergenie_jobs_processed_total"));
        assert!(metrics.jobs_processed_count("scale", "completed") >= 1.0);
    }
}
