//! HTTP mapping for control-plane errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use clustergenie_core::errors::*;
use clustergenie_core::models::ErrorResponse;

/// Wrapper that maps [`ControlPlaneError`] onto an HTTP status with the
/// stable `{"error": ...}` body.
pub struct ApiError(pub ControlPlaneError);

impl<E> From<E> for ApiError
where
    E: Into<ControlPlaneError>,
{
    fn from(e: E) -> ApiError {
        ApiError(e.into())
    }
}

fn status_for(err: &ControlPlaneError) -> StatusCode {
    match err {
        ControlPlaneError::Job(e) => match e {
            JobError::InvalidType
            | JobError::NotPending
            | JobError::InvalidParameters
            | JobError::ClusterIdRequired => StatusCode::BAD_REQUEST,
            JobError::NotFound => StatusCode::NOT_FOUND,
            JobError::QueueFull => StatusCode::INTERNAL_SERVER_ERROR,
        },
        ControlPlaneError::Provision(e) => match e {
            ProvisionError::NameAndRegionRequired
            | ProvisionError::InvalidScaleAction
            | ProvisionError::NoDropletsToScaleDown => StatusCode::BAD_REQUEST,
            ProvisionError::ClusterNotFound | ProvisionError::DropletNotFound => {
                StatusCode::NOT_FOUND
            }
        },
        ControlPlaneError::Schedule(e) => match e {
            ScheduleError::NameRequired => StatusCode::BAD_REQUEST,
            ScheduleError::ProviderNotFound => StatusCode::NOT_FOUND,
            ScheduleError::NoCapacity => StatusCode::INTERNAL_SERVER_ERROR,
        },
        ControlPlaneError::Policy(e) => match e {
            PolicyError::ClusterIdRequired | PolicyError::ReplicaBounds => StatusCode::BAD_REQUEST,
            PolicyError::NotFound => StatusCode::NOT_FOUND,
        },
        ControlPlaneError::Deployment(e) => match e {
            DeploymentError::MissingFields => StatusCode::BAD_REQUEST,
            DeploymentError::NotFound => StatusCode::NOT_FOUND,
        },
        ControlPlaneError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ControlPlaneError::Store(_) | ControlPlaneError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}
