//! End-to-end scenarios over the REST surface.
//!
//! The control plane is wired exactly as in `main`, with the in-process
//! event bus and in-memory stores, and driven through the axum router.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use clustergenie_api::{router, AppState};
use clustergenie_core::models::Metric;
use clustergenie_core::{CoreConfig, Metrics, ScopeMode};
use clustergenie_events::{
    run_consumer, Broker, Event, EventPublisher, EventSink, LocalEventBus, CLUSTER_EVENTS_TOPIC,
};
use clustergenie_jobs::{ClusterProvisioner, EventHandler, JobService};
use clustergenie_limiter::LimiterManager;
use clustergenie_provisioning::{
    AutoscalerService, BillingService, ClusterService, DeploymentService, DiagnosisService,
    MonitoringService, ProvisioningService, ScalesClusters, SchedulerService,
};
use clustergenie_store::{
    KvDeploymentRepository, KvPolicyRepository, KvProviderRepository, KvStore,
    MemoryClusterRepository, MemoryDropletRepository, MemoryJobRepository, MemoryKv,
    MemoryMetricRepository, MetricRepository,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct TestPlane {
    app: Router,
    kv: Arc<dyn KvStore>,
    metric_repo: Arc<MemoryMetricRepository>,
    broker: Arc<Broker>,
}

fn build_plane(config: CoreConfig, deploy_failure_rate: f64) -> TestPlane {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());

    let cluster_repo = Arc::new(MemoryClusterRepository::new());
    let droplet_repo = Arc::new(MemoryDropletRepository::new());
    let job_repo = Arc::new(MemoryJobRepository::new());
    let metric_repo = Arc::new(MemoryMetricRepository::new());
    let policy_repo = Arc::new(KvPolicyRepository::new(kv.clone()));
    let deployment_repo = Arc::new(KvDeploymentRepository::new(kv.clone()));
    let provider_repo = Arc::new(KvProviderRepository::new(kv.clone()));

    let broker = Arc::new(Broker::new());
    let bus = Arc::new(LocalEventBus::new(broker.clone()));
    let consumer_rx = bus.subscribe_topic(CLUSTER_EVENTS_TOPIC);
    let publisher: Arc<dyn EventPublisher> = bus;

    let limiter = Arc::new(LimiterManager::new(Some(kv.clone())));
    limiter.register_default("jobs", config.jobs_bucket);
    limiter.register_default("diagnosis", config.diagnosis_bucket);

    let metrics = Metrics::new().unwrap();

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
    let deployments = Arc::new(
        DeploymentService::new(deployment_repo, publisher.clone())
            .with_failure_rate(deploy_failure_rate)
            .with_step_delay(10, 0),
    );
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

    let provisioner: Arc<dyn ClusterProvisioner> = provisioning.clone();
    let handler: Arc<dyn EventSink> = Arc::new(EventHandler::new(
        job_repo.clone(),
        provisioner,
        publisher.clone(),
    ));
    tokio::spawn(run_consumer(consumer_rx, handler));

    let state = AppState {
        config,
        metrics,
        limiter,
        broker: broker.clone(),
        jobs,
        clusters,
        provisioning,
        scheduler,
        autoscaler,
        deployments,
        monitoring,
        diagnosis,
        billing,
    };

    TestPlane {
        app: router(state),
        kv,
        metric_repo,
        broker,
    }
}

fn default_plane() -> TestPlane {
    build_plane(CoreConfig::default(), 0.0)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, value)
}

async fn create_cluster(app: &Router, name: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/api/v1/clusters",
        Some(json!({"name": name, "region": "nyc1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["cluster"]["id"].as_str().unwrap().to_string()
}

async fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(e) = rx.try_recv() {
        out.push(e);
    }
    out
}

#[tokio::test]
async fn scenario_scale_via_orchestration() {
    let plane = default_plane();
    let mut tap = plane.broker.subscribe();

    let cluster_id = create_cluster(&plane.app, "c1").await;

    let (status, body) = call(
        &plane.app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"type": "scale", "parameters": {"cluster_id": cluster_id}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = body["job"]["id"].as_str().unwrap().to_string();
    let trace_id = body["job"]["trace_id"].as_str().unwrap().to_string();

    let mut job = Value::Null;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (status, fetched) = call(&plane.app, "GET", &format!("/api/v1/jobs/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        if fetched["status"] == "completed" {
            job = fetched;
            break;
        }
    }
    assert_eq!(job["status"], "completed", "job never completed: {}", job);
    assert_eq!(job["progress"], 100);

    // the final job_completed publish trails the status write slightly
    tokio::time::sleep(Duration::from_millis(100)).await;

    // event log for the job, in order, with the trace id preserved
    let events = drain(&mut tap).await;
    let job_events: Vec<&Event> = events.iter().filter(|e| e.job_id == job_id).collect();
    let kinds: Vec<&str> = job_events
        .iter()
        .map(|e| e.kind.as_str())
        .filter(|k| *k != "job_requested")
        .collect();
    assert_eq!(
        kinds,
        vec![
            "job_started",
            "job_progress",
            "job_progress",
            "job_progress",
            "job_completed"
        ]
    );
    let progresses: Vec<u32> = job_events
        .iter()
        .filter(|e| e.kind.as_str() != "job_requested")
        .map(|e| e.progress.unwrap_or(0))
        .collect();
    assert_eq!(progresses, vec![0, 10, 30, 75, 100]);
    assert!(job_events.iter().all(|e| e.trace_id == trace_id));

    // exactly one new droplet joined the cluster
    let (_, cluster) = call(
        &plane.app,
        "GET",
        &format!("/api/v1/clusters/{}", cluster_id),
        None,
    )
    .await;
    assert_eq!(cluster["cluster"]["droplets"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn scenario_diagnose_rate_limit_cluster_scope() {
    let config = CoreConfig {
        diagnosis_scope: ScopeMode::Cluster,
        ..CoreConfig::default()
    };
    let plane = build_plane(config, 0.0);

    let cx = create_cluster(&plane.app, "cx").await;
    let cy = create_cluster(&plane.app, "cy").await;

    // store override for cx: empty refill, two requests
    plane
        .kv
        .hset(
            &format!("limiter_config:diagnosis:cluster:{}", cx),
            &[("refill_rate", "0".into()), ("capacity", "2".into())],
        )
        .await
        .unwrap();

    let diagnose = |id: String| {
        let app = plane.app.clone();
        async move {
            call(
                &app,
                "POST",
                "/api/v1/diagnosis/diagnose",
                Some(json!({"cluster_id": id})),
            )
            .await
        }
    };

    let (s1, _) = diagnose(cx.clone()).await;
    let (s2, _) = diagnose(cx.clone()).await;
    let (s3, body) = diagnose(cx.clone()).await;
    assert_eq!(s1, StatusCode::OK);
    assert_eq!(s2, StatusCode::OK);
    assert_eq!(s3, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({"error": "rate limit exceeded"}));

    // another cluster's bucket is untouched
    let (s4, _) = diagnose(cy).await;
    assert_eq!(s4, StatusCode::OK);

    // the rejection shows up on the counter
    let (_, metrics) = call(&plane.app, "GET", "/metrics", None).await;
    let text = metrics.as_str().unwrap();
    assert!(text.contains("clustergenie_rate_limit_exceeded_total"));
}

#[tokio::test]
async fn scenario_queue_overflow_persists_rejection() {
    let config = CoreConfig {
        worker_count: 1,
        worker_queue: 1,
        ..CoreConfig::default()
    };
    let plane = build_plane(config, 0.0);

    let monitor_job = json!({"type": "monitor", "parameters": {}});

    // the first job occupies the single worker for about a second
    let (s1, _) = call(&plane.app, "POST", "/api/v1/jobs", Some(monitor_job.clone())).await;
    assert_eq!(s1, StatusCode::CREATED);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // second fills the queue, third overflows
    let (s2, _) = call(&plane.app, "POST", "/api/v1/jobs", Some(monitor_job.clone())).await;
    let (s3, body) = call(&plane.app, "POST", "/api/v1/jobs", Some(monitor_job)).await;
    assert_eq!(s2, StatusCode::CREATED);
    assert_eq!(s3, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "job queue full"}));

    let (_, listed) = call(&plane.app, "GET", "/api/v1/jobs?page_size=50", None).await;
    let rejected: Vec<&Value> = listed["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|j| j["status"] == "queued_rejected")
        .collect();
    assert_eq!(rejected.len(), 1);

    let (_, metrics) = call(&plane.app, "GET", "/metrics", None).await;
    let text = metrics.as_str().unwrap();
    assert!(
        text.contains(r#"clustergenie_jobs_processed_total{job_type="monitor",status="rejected"} 1"#),
        "rejected counter missing from exposition"
    );
}

#[tokio::test]
async fn scenario_deployment_auto_rollback() {
    // monitor steps always fail
    let plane = build_plane(CoreConfig::default(), 1.0);

    let (status, body) = call(
        &plane.app,
        "POST",
        "/api/v1/deployments/start",
        Some(json!({
            "cluster_id": "c1",
            "version": "v2",
            "strategy": "canary",
            "target_percent": 10
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    let id = body["id"].as_str().unwrap().to_string();

    let mut deployment = Value::Null;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let (_, fetched) = call(
            &plane.app,
            "GET",
            &format!("/api/v1/deployments/{}", id),
            None,
        )
        .await;
        if fetched["status"] == "rolled_back" {
            deployment = fetched;
            break;
        }
    }
    assert_eq!(deployment["status"], "rolled_back");
    let logs: Vec<String> = deployment["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l.as_str().unwrap().to_string())
        .collect();
    assert!(logs
        .iter()
        .any(|l| l.contains("Monitoring detected issues")));
    assert!(logs.iter().any(|l| l == "Automatic rollback completed"));
}

#[tokio::test]
async fn scenario_scheduler_migration() {
    let plane = default_plane();

    for (name, capacity) in [("do", 2), ("aws", 3)] {
        let (status, _) = call(
            &plane.app,
            "POST",
            "/api/v1/providers",
            Some(json!({
                "name": name,
                "regions": [format!("{}-1", name)],
                "capacity": capacity,
                "price_per_hour": 0.05
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    // "do" starts full
    plane.kv.set_i64("provider_used:provider-do", 2).await.unwrap();

    let (status, created) = call(
        &plane.app,
        "POST",
        "/api/v1/droplets",
        Some(json!({"name": "d1", "region": "nyc1", "provider": "do"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let droplet_id = created["droplet"]["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &plane.app,
        "POST",
        "/api/v1/providers/migrate",
        Some(json!({"droplet_id": droplet_id, "target_provider": "aws"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, providers) = call(&plane.app, "GET", "/api/v1/providers", None).await;
    let used_of = |name: &str| {
        providers
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["name"] == name)
            .unwrap()["used"]
            .as_i64()
            .unwrap()
    };
    assert_eq!(used_of("do"), 1);
    assert_eq!(used_of("aws"), 1);

    let (_, droplet) = call(
        &plane.app,
        "GET",
        &format!("/api/v1/droplets/{}", droplet_id),
        None,
    )
    .await;
    assert_eq!(droplet["droplet"]["provider"], "aws");
}

#[tokio::test]
async fn scenario_autoscale_evaluation_adds_a_droplet() {
    let plane = default_plane();
    let cluster_id = create_cluster(&plane.app, "c1").await;

    // capacity for the scale-up the policy will trigger
    let (status, _) = call(
        &plane.app,
        "POST",
        "/api/v1/providers",
        Some(json!({"name": "do", "regions": ["nyc1"], "capacity": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &plane.app,
        "POST",
        "/api/v1/autoscaling/policies",
        Some(json!({
            "name": "cpu-high",
            "cluster_id": cluster_id,
            "type": "metrics",
            "enabled": true,
            "min_replicas": 1,
            "max_replicas": 5,
            "metric_type": "cpu",
            "metric_trigger": 0.8
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    plane
        .metric_repo
        .create(Metric {
            id: "seed-cpu".into(),
            cluster_id: cluster_id.clone(),
            metric_type: "cpu".into(),
            value: 95.0,
            timestamp: Utc::now(),
            unit: "%".into(),
        })
        .await
        .unwrap();

    let (status, report) = call(
        &plane.app,
        "POST",
        "/api/v1/autoscaling/evaluate",
        Some(json!({"cluster_id": cluster_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["evaluated"], 1);
    let actions = report["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert!(actions[0].as_str().unwrap().contains("scale_up"));

    let (_, droplets) = call(&plane.app, "GET", "/api/v1/droplets", None).await;
    assert_eq!(droplets["droplets"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn rest_contract_basics() {
    let plane = default_plane();

    let (status, body) = call(
        &plane.app,
        "POST",
        "/api/v1/jobs",
        Some(json!({"type": "reticulate", "parameters": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "invalid job type"}));

    let (status, _) = call(&plane.app, "GET", "/api/v1/jobs/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&plane.app, "GET", "/api/v1/clusters/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&plane.app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    // health snapshot aggregation over seeded samples
    let cluster_id = create_cluster(&plane.app, "healthy").await;
    for (metric_type, value) in [("cpu", 81.0), ("memory", 50.0), ("disk", 10.0)] {
        plane
            .metric_repo
            .create(Metric {
                id: format!("seed-{}", metric_type),
                cluster_id: cluster_id.clone(),
                metric_type: metric_type.into(),
                value,
                timestamp: Utc::now(),
                unit: "%".into(),
            })
            .await
            .unwrap();
    }
    let (status, health) = call(
        &plane.app,
        "GET",
        &format!("/api/v1/health/{}", cluster_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "warning");
    assert_eq!(health["issues"].as_array().unwrap().len(), 1);
}
