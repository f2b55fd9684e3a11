//! Rate-limit and HTTP metrics middleware.
//!
//! The rate-limit layer resolves the bucket scope per request: global, per
//! user from the `X-User-ID` header, or per cluster from the JSON body's
//! `cluster_id` (the body is restored for the downstream handler).

use axum::body::{to_bytes, Body};
use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use clustergenie_core::config::ScopeMode;
use clustergenie_core::models::ErrorResponse;
use clustergenie_core::Metrics;
use clustergenie_limiter::{LimiterManager, RateLimiter};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

const BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<LimiterManager>,
    pub metrics: Metrics,
    pub bucket: &'static str,
    pub scope: ScopeMode,
}

pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let (scope_type, scope_id, request) = match state.scope {
        ScopeMode::Global => ("global", String::new(), request),
        ScopeMode::User => {
            let uid = request
                .headers()
                .get("X-User-ID")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            ("user", uid, request)
        }
        ScopeMode::Cluster => {
            let (cluster_id, request) = match extract_body_field(request, "cluster_id").await {
                Ok(pair) => pair,
                Err(response) => return response,
            };
            ("cluster", cluster_id, request)
        }
    };

    let scope_key = if scope_id.is_empty() {
        String::new()
    } else {
        format!("{}:{}", scope_type, scope_id)
    };

    let bucket = state.limiter.get_or_create(state.bucket, &scope_key).await;
    if !bucket.allow(1).await {
        warn!(
            bucket = state.bucket,
            scope = %scope_key,
            "rate limit exceeded"
        );
        state
            .metrics
            .rate_limit_exceeded
            .with_label_values(&[state.bucket, scope_type, &scope_id])
            .inc();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "rate limit exceeded".to_string(),
            }),
        )
            .into_response();
    }

    let status = bucket.status().await;
    state
        .metrics
        .rate_limit_available
        .with_label_values(&[state.bucket, scope_type, &scope_id])
        .set(status.available);

    next.run(request).await
}

/// Read a string field from the JSON body, restoring the body afterwards.
async fn extract_body_field(
    request: Request,
    field: &str,
) -> Result<(String, Request), Response> {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "unreadable request body".to_string(),
                }),
            )
                .into_response())
        }
    };

    let value = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|v| v.get(field).and_then(|f| f.as_str()).map(String::from))
        .unwrap_or_default();

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok((value, request))
}

pub async fn http_metrics(
    State(metrics): State<Metrics>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();

    metrics
        .http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, &path, &status])
        .observe(started.elapsed().as_secs_f64());

    response
}
