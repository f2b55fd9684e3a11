//! REST surface (`/api/v1`).

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{middleware as axum_middleware, Json, Router};
use clustergenie_core::config::CoreConfig;
use clustergenie_core::models::*;
use clustergenie_core::Metrics;
use clustergenie_events::Broker;
use clustergenie_jobs::JobService;
use clustergenie_limiter::LimiterManager;
use clustergenie_provisioning::{
    AutoscalerService, BillingService, ClusterService, DeploymentService, DiagnosisService,
    MonitoringService, ProvisioningService, SchedulerService,
};
use futures::stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::ApiError;
use crate::middleware::{http_metrics, rate_limit, RateLimitState};
use crate::observability;

const API_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_JOBS_PAGE_SIZE: u64 = 5;

#[derive(Clone)]
pub struct AppState {
    pub config: CoreConfig,
    pub metrics: Metrics,
    pub limiter: Arc<LimiterManager>,
    pub broker: Arc<Broker>,
    pub jobs: Arc<JobService>,
    pub clusters: Arc<ClusterService>,
    pub provisioning: Arc<ProvisioningService>,
    pub scheduler: Arc<SchedulerService>,
    pub autoscaler: Arc<AutoscalerService>,
    pub deployments: Arc<DeploymentService>,
    pub monitoring: Arc<MonitoringService>,
    pub diagnosis: Arc<DiagnosisService>,
    pub billing: Arc<BillingService>,
}

pub fn router(state: AppState) -> Router {
    let jobs_limit = RateLimitState {
        limiter: state.limiter.clone(),
        metrics: state.metrics.clone(),
        bucket: "jobs",
        scope: state.config.jobs_scope,
    };
    let diagnosis_limit = RateLimitState {
        limiter: state.limiter.clone(),
        metrics: state.metrics.clone(),
        bucket: "diagnosis",
        scope: state.config.diagnosis_scope,
    };

    // admission control sits on the mutating endpoints; reads stay cheap
    let api = Router::new()
        .route(
            "/jobs",
            post(create_job)
                .layer(axum_middleware::from_fn_with_state(jobs_limit, rate_limit))
                .get(list_jobs),
        )
        .route("/jobs/:id", get(get_job))
        .route(
            "/diagnosis/diagnose",
            post(diagnose_cluster).layer(axum_middleware::from_fn_with_state(
                diagnosis_limit,
                rate_limit,
            )),
        )
        .route("/clusters", post(create_cluster).get(list_clusters))
        .route(
            "/clusters/:id",
            get(get_cluster).put(update_cluster).delete(delete_cluster),
        )
        .route("/clusters/:id/scale", post(scale_cluster))
        .route("/droplets", post(create_droplet).get(list_droplets))
        .route("/droplets/:id", get(get_droplet).delete(delete_droplet))
        .route("/health/:cluster_id", get(cluster_health))
        .route(
            "/autoscaling/policies",
            post(create_policy).get(list_policies),
        )
        .route(
            "/autoscaling/policies/:id",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .route("/autoscaling/evaluate", post(evaluate_policies))
        .route("/providers", post(create_provider).get(list_providers))
        .route("/providers/migrate", post(migrate_droplet))
        .route("/deployments/start", post(start_deployment))
        .route("/deployments", get(list_deployments))
        .route("/deployments/:id", get(get_deployment))
        .route("/deployments/:id/rollback", post(rollback_deployment))
        .route("/metrics/query", get(query_metrics))
        .route("/metrics", delete(delete_metrics))
        .route("/billing/:cluster_id", get(cluster_cost))
        .route(
            "/observability/ratelimit",
            get(observability::ratelimit_status),
        )
        .route(
            "/observability/ratelimit/config",
            post(observability::set_ratelimit_config)
                .get(observability::get_ratelimit_config)
                .delete(observability::delete_ratelimit_config),
        )
        .route(
            "/observability/ratelimit/configs",
            get(observability::list_ratelimit_configs),
        )
        .route(
            "/observability/workerpool",
            get(observability::workerpool_status),
        )
        .route("/events/stream", get(event_stream));

    Router::new()
        .nest("/api/v1", api)
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .layer(axum_middleware::from_fn_with_state(
            state.metrics.clone(),
            http_metrics,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// jobs
// ---------------------------------------------------------------------------

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let resp = state.jobs.create(&req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.jobs.get(&id).await?))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(mut req): Query<ListJobsRequest>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    if req.page_size == 0 {
        req.page_size = DEFAULT_JOBS_PAGE_SIZE;
    }
    Ok(Json(state.jobs.list(&req).await?))
}

// ---------------------------------------------------------------------------
// clusters
// ---------------------------------------------------------------------------

async fn create_cluster(
    State(state): State<AppState>,
    Json(req): Json<CreateClusterRequest>,
) -> Result<(StatusCode, Json<ClusterResponse>), ApiError> {
    let resp = state.clusters.create(&req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn get_cluster(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClusterResponse>, ApiError> {
    let cluster = state.clusters.get(&id).await?;
    Ok(Json(ClusterResponse {
        cluster,
        message: "Cluster retrieved".to_string(),
    }))
}

async fn list_clusters(
    State(state): State<AppState>,
) -> Result<Json<ListClustersResponse>, ApiError> {
    Ok(Json(ListClustersResponse {
        clusters: state.clusters.list().await?,
    }))
}

async fn update_cluster(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateClusterRequest>,
) -> Result<Json<ClusterResponse>, ApiError> {
    Ok(Json(state.clusters.update(&id, &req).await?))
}

async fn delete_cluster(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.clusters.delete(&id).await?;
    Ok(Json(
        serde_json::json!({"message": "Cluster deleted successfully"}),
    ))
}

async fn scale_cluster(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ScaleClusterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // 404 before action validation
    state.clusters.get(&id).await?;
    state.provisioning.scale(&id, &req.action).await?;
    Ok(Json(serde_json::json!({
        "message": format!("cluster {} {} initiated", id, req.action)
    })))
}

// ---------------------------------------------------------------------------
// droplets
// ---------------------------------------------------------------------------

async fn create_droplet(
    State(state): State<AppState>,
    Json(req): Json<CreateDropletRequest>,
) -> Result<(StatusCode, Json<DropletResponse>), ApiError> {
    let resp = state.provisioning.create_droplet(&req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn get_droplet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DropletResponse>, ApiError> {
    let droplet = state.provisioning.get_droplet(&id).await?;
    Ok(Json(DropletResponse {
        droplet,
        message: "Droplet retrieved".to_string(),
    }))
}

async fn list_droplets(
    State(state): State<AppState>,
) -> Result<Json<ListDropletsResponse>, ApiError> {
    Ok(Json(ListDropletsResponse {
        droplets: state.provisioning.list_droplets().await?,
    }))
}

async fn delete_droplet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.provisioning.delete_droplet(&id).await?;
    Ok(Json(serde_json::json!({"message": "Droplet deleted"})))
}

// ---------------------------------------------------------------------------
// diagnosis & health
// ---------------------------------------------------------------------------

async fn diagnose_cluster(
    State(state): State<AppState>,
    Json(req): Json<DiagnoseClusterRequest>,
) -> Result<Json<DiagnoseClusterResponse>, ApiError> {
    Ok(Json(state.diagnosis.diagnose(&req).await?))
}

async fn cluster_health(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> Result<Json<HealthCheckResponse>, ApiError> {
    Ok(Json(state.monitoring.health_check(&cluster_id).await?))
}

// ---------------------------------------------------------------------------
// autoscaling
// ---------------------------------------------------------------------------

async fn create_policy(
    State(state): State<AppState>,
    Json(req): Json<CreateAutoscalePolicyRequest>,
) -> Result<(StatusCode, Json<AutoscalePolicy>), ApiError> {
    let policy = state.autoscaler.create_policy(&req).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AutoscalePolicy>, ApiError> {
    Ok(Json(state.autoscaler.get_policy(&id).await?))
}

#[derive(Deserialize)]
struct ListPoliciesQuery {
    #[serde(default)]
    cluster_id: String,
}

async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<ListPoliciesQuery>,
) -> Result<Json<Vec<AutoscalePolicy>>, ApiError> {
    Ok(Json(state.autoscaler.list_policies(&query.cluster_id).await?))
}

async fn update_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAutoscalePolicyRequest>,
) -> Result<Json<AutoscalePolicy>, ApiError> {
    Ok(Json(state.autoscaler.update_policy(&id, &req).await?))
}

async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.autoscaler.delete_policy(&id).await?;
    Ok(Json(serde_json::json!({"message": "Policy deleted"})))
}

#[derive(Deserialize)]
struct EvaluateRequest {
    cluster_id: String,
}

async fn evaluate_policies(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluationReport>, ApiError> {
    Ok(Json(state.autoscaler.evaluate(&req.cluster_id).await?))
}

// ---------------------------------------------------------------------------
// providers & scheduling
// ---------------------------------------------------------------------------

async fn create_provider(
    State(state): State<AppState>,
    Json(req): Json<CreateProviderRequest>,
) -> Result<(StatusCode, Json<Provider>), ApiError> {
    let provider = state.scheduler.create_provider(&req).await?;
    Ok((StatusCode::CREATED, Json(provider)))
}

async fn list_providers(State(state): State<AppState>) -> Result<Json<Vec<Provider>>, ApiError> {
    Ok(Json(state.scheduler.list_providers().await?))
}

async fn migrate_droplet(
    State(state): State<AppState>,
    Json(req): Json<MigrateDropletRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .scheduler
        .migrate_droplet(&req.droplet_id, &req.target_provider)
        .await?;
    Ok(Json(serde_json::json!({
        "message": format!("droplet {} migrated to {}", req.droplet_id, req.target_provider)
    })))
}

// ---------------------------------------------------------------------------
// deployments
// ---------------------------------------------------------------------------

async fn start_deployment(
    State(state): State<AppState>,
    Json(req): Json<StartDeploymentRequest>,
) -> Result<(StatusCode, Json<Deployment>), ApiError> {
    let deployment = state.deployments.start_deployment(&req).await?;
    Ok((StatusCode::CREATED, Json(deployment)))
}

async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    Ok(Json(state.deployments.get_deployment(&id).await?))
}

#[derive(Deserialize)]
struct ListDeploymentsQuery {
    cluster_id: Option<String>,
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<Vec<Deployment>>, ApiError> {
    Ok(Json(
        state
            .deployments
            .list_deployments(query.cluster_id.as_deref())
            .await?,
    ))
}

async fn rollback_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    Ok(Json(state.deployments.rollback(&id).await?))
}

// ---------------------------------------------------------------------------
// monitoring & billing
// ---------------------------------------------------------------------------

async fn query_metrics(
    State(state): State<AppState>,
    Query(req): Query<GetMetricsRequest>,
) -> Result<Json<GetMetricsResponse>, ApiError> {
    Ok(Json(state.monitoring.get_metrics(&req).await?))
}

async fn delete_metrics(
    State(state): State<AppState>,
    Json(req): Json<DeleteMetricsRequest>,
) -> Result<Json<DeleteMetricsResponse>, ApiError> {
    Ok(Json(state.monitoring.delete_metrics(&req).await?))
}

async fn cluster_cost(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> Result<Json<CostEstimate>, ApiError> {
    Ok(Json(state.billing.estimate_cluster_cost(&cluster_id).await?))
}

// ---------------------------------------------------------------------------
// live events, exposition, liveness
// ---------------------------------------------------------------------------

async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let rx = state.broker.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse_event = axum::response::sse::Event::default()
            .event(event.kind.as_str().to_string())
            .data(serde_json::to_string(&event).unwrap_or_default());
        Some((Ok(sse_event), rx))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "version": API_VERSION,
    }))
}
