//! Rate-limiter and worker-pool introspection endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use clustergenie_core::config::BucketSettings;
use clustergenie_core::models::ErrorResponse;
use clustergenie_limiter::RateLimiter;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::rest::AppState;

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scope_type: String,
    #[serde(default)]
    pub scope_id: String,
}

impl ScopeQuery {
    fn scope_key(&self) -> String {
        match self.scope_type.as_str() {
            "user" | "cluster" if !self.scope_id.is_empty() => {
                format!("{}:{}", self.scope_type, self.scope_id)
            }
            _ => String::new(),
        }
    }
}

/// `GET /observability/ratelimit` — one bucket when `name` is given, the full
/// snapshot otherwise.
pub async fn ratelimit_status(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    if query.name.is_empty() {
        let snapshot = state.limiter.snapshot_status().await;
        return Ok(Json(serde_json::json!({ "buckets": snapshot })));
    }

    match state.limiter.get(&query.name, &query.scope_key()) {
        Some(bucket) => {
            let status = bucket.status().await;
            Ok(Json(serde_json::json!({
                "name": query.name,
                "scope_type": if query.scope_type.is_empty() { "global" } else { &query.scope_type },
                "scope_id": query.scope_id,
                "available": status.available,
                "capacity": status.capacity,
                "refill_rate": status.refill_rate,
            })))
        }
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "bucket not found".to_string(),
            }),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub name: String,
    #[serde(default)]
    pub scope_type: String,
    #[serde(default)]
    pub scope_id: String,
    pub refill_rate: f64,
    pub capacity: f64,
}

pub async fn set_ratelimit_config(
    State(state): State<AppState>,
    Json(req): Json<SetConfigRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = ScopeQuery {
        name: req.name.clone(),
        scope_type: req.scope_type.clone(),
        scope_id: req.scope_id.clone(),
    }
    .scope_key();
    state
        .limiter
        .set_override(
            &req.name,
            &scope,
            BucketSettings {
                refill_rate: req.refill_rate,
                capacity: req.capacity,
            },
        )
        .await?;
    Ok(Json(serde_json::json!({"message": "config stored"})))
}

pub async fn get_ratelimit_config(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<BucketSettings>, (StatusCode, Json<ErrorResponse>)> {
    match state
        .limiter
        .get_override(&query.name, &query.scope_key())
        .await
    {
        Some(settings) => Ok(Json(settings)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "config not found".to_string(),
            }),
        )),
    }
}

pub async fn delete_ratelimit_config(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .limiter
        .delete_override(&query.name, &query.scope_key())
        .await?;
    Ok(Json(serde_json::json!({"message": "config deleted"})))
}

pub async fn list_ratelimit_configs(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let keys = state.limiter.list_overrides().await?;
    Ok(Json(serde_json::json!({ "configs": keys })))
}

#[derive(Debug, Serialize)]
pub struct WorkerPoolStatus {
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub active_workers: i64,
    pub worker_count: usize,
    pub queued: Vec<String>,
}

pub async fn workerpool_status(State(state): State<AppState>) -> Json<WorkerPoolStatus> {
    let pool = state.jobs.worker_pool();
    Json(WorkerPoolStatus {
        queue_length: pool.queue_length(),
        queue_capacity: pool.queue_capacity(),
        active_workers: pool.active_workers(),
        worker_count: pool.worker_count(),
        queued: pool.snapshot_queue(),
    })
}
