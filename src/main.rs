//! ClusterGenie control-plane server.
//!
//! Composition root: configuration, stores, event bus, services, background
//! tasks and the REST listener. Wiring is immutable once built.

use anyhow::Result;
use clustergenie_api::exporter::{
    spawn_cluster_metrics_exporter, spawn_gauge_refresher, GAUGE_REFRESH_PERIOD,
};
use clustergenie_api::{router, AppState};
use clustergenie_core::{CoreConfig, Metrics};
use clustergenie_events::{
    run_consumer, Broker, EventPublisher, EventSink, KafkaEventBus, KafkaEventConsumer,
    LocalEventBus, CLUSTER_EVENTS_TOPIC,
};
use clustergenie_jobs::{ClusterProvisioner, EventHandler, JobService};
use clustergenie_limiter::LimiterManager;
use clustergenie_provisioning::{
    AutoscalerService, BillingService, ClusterService, DeploymentService, DiagnosisService,
    MonitoringService, ProvisioningService, ScalesClusters, SchedulerService,
};
use clustergenie_store::{
    ClusterRepository, KvDeploymentRepository, KvPolicyRepository, KvProviderRepository, KvStore,
    MemoryClusterRepository, MemoryDropletRepository, MemoryJobRepository, MemoryKv,
    MemoryMetricRepository, MetricRepository, RedisKv,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const CONSUMER_GROUP: &str = "clustergenie-core";
const CLUSTER_EXPORT_PERIOD: Duration = Duration::from_secs(15);
const AUTOSCALER_PERIOD: Duration = Duration::from_secs(60);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = CoreConfig::from_env();
    info!("🚀 Starting ClusterGenie control plane");

    // Key-value store: Redis when configured, otherwise in-memory
    // (per-instance; fine for single-node and demo deployments).
    let kv: Arc<dyn KvStore> = match &config.redis_addr {
        Some(addr) => {
            info!("🔌 Connecting key-value store at {}", addr);
            Arc::new(RedisKv::connect(addr).await?)
        }
        None => {
            info!("📦 No key-value store configured, using in-memory store");
            Arc::new(MemoryKv::new())
        }
    };
    if let Some(dsn) = &config.database_dsn {
        info!("📦 Record store DSN configured ({}), records kept in memory in this build", dsn);
    }

    // Record store.
    let cluster_repo = Arc::new(MemoryClusterRepository::new());
    let droplet_repo = Arc::new(MemoryDropletRepository::new());
    let job_repo = Arc::new(MemoryJobRepository::new());
    let metric_repo = Arc::new(MemoryMetricRepository::new());
    let policy_repo = Arc::new(KvPolicyRepository::new(kv.clone()));
    let deployment_repo = Arc::new(KvDeploymentRepository::new(kv.clone()));
    let provider_repo = Arc::new(KvProviderRepository::new(kv.clone()));

    // Event bus: durable Kafka tier when brokers are configured, otherwise
    // the in-process bus; both fan out through the broker.
    let broker = Arc::new(Broker::new());
    let mut local_consumer_rx = None;
    let publisher: Arc<dyn EventPublisher> = match &config.kafka_brokers {
        Some(brokers) => Arc::new(KafkaEventBus::new(brokers, broker.clone())?),
        None => {
            info!("📦 No durable-log brokers configured, using in-process event bus");
            let bus = Arc::new(LocalEventBus::new(broker.clone()));
            local_consumer_rx = Some(bus.subscribe_topic(CLUSTER_EVENTS_TOPIC));
            bus
        }
    };

    // Admission control.
    let limiter = Arc::new(LimiterManager::new(Some(kv.clone())));
    limiter.register_default("jobs", config.jobs_bucket);
    limiter.register_default("diagnosis", config.diagnosis_bucket);

    let metrics = Metrics::new()?;

    // Services, wired once.
    let clusters = Arc::new(ClusterService::new(cluster_repo.clone()));
    let scheduler = Arc::new(SchedulerService::new(
        provider_repo.clone(),
        droplet_repo.clone(),
    ));
    let provisioning = Arc::new(ProvisioningService::new(
        droplet_repo.clone(),
        publisher.clone(),
        clusters.clone(),
        Some(scheduler.clone()),
    ));
    let monitoring = Arc::new(MonitoringService::new(metric_repo.clone()));
    let scaler: Arc<dyn ScalesClusters> = provisioning.clone();
    let autoscaler = Arc::new(AutoscalerService::new(
        policy_repo,
        scaler,
        monitoring.clone(),
    ));
    let deployments = Arc::new(DeploymentService::new(deployment_repo, publisher.clone()));
    let diagnosis = Arc::new(DiagnosisService::new(cluster_repo.clone()));
    let billing = Arc::new(BillingService::new(
        droplet_repo.clone(),
        provider_repo.clone(),
    ));
    let jobs = JobService::new(
        job_repo.clone(),
        publisher.clone(),
        metrics.clone(),
        config.worker_count,
        config.worker_queue,
    );
    jobs.worker_pool().start();

    // Orchestrator consumer.
    let provisioner: Arc<dyn ClusterProvisioner> = provisioning.clone();
    let handler: Arc<dyn EventSink> = Arc::new(EventHandler::new(
        job_repo.clone(),
        provisioner,
        publisher.clone(),
    ));
    match (&config.kafka_brokers, local_consumer_rx) {
        (Some(brokers), _) => {
            let consumer =
                KafkaEventConsumer::new(brokers, CLUSTER_EVENTS_TOPIC, CONSUMER_GROUP)?;
            tokio::spawn(consumer.run(handler));
        }
        (None, Some(rx)) => {
            tokio::spawn(run_consumer(rx, handler));
        }
        (None, None) => unreachable!("local bus always registers a consumer queue"),
    }

    // Background tasks.
    spawn_gauge_refresher(
        metrics.clone(),
        limiter.clone(),
        jobs.clone(),
        GAUGE_REFRESH_PERIOD,
    );
    let exporter_clusters: Arc<dyn ClusterRepository> = cluster_repo.clone();
    let exporter_metrics: Arc<dyn MetricRepository> = metric_repo.clone();
    spawn_cluster_metrics_exporter(
        metrics.clone(),
        exporter_clusters,
        exporter_metrics,
        CLUSTER_EXPORT_PERIOD,
    );
    let engine_clusters: Arc<dyn ClusterRepository> = cluster_repo.clone();
    autoscaler.spawn_engine(engine_clusters, AUTOSCALER_PERIOD);

    let state = AppState {
        config: config.clone(),
        metrics,
        limiter,
        broker,
        jobs: jobs.clone(),
        clusters,
        provisioning,
        scheduler,
        autoscaler,
        deployments,
        monitoring,
        diagnosis,
        billing,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("✅ ClusterGenie API listening on {}", config.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Shutting down, draining worker pool");
    jobs.worker_pool().stop(SHUTDOWN_DRAIN).await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
