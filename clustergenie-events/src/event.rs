//! Canonical event envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event type discriminant. Unrecognized types round-trip through
/// [`EventKind::Other`] so opaque events can be logged and dropped without
/// losing their wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DropletCreated,
    JobRequested,
    JobStarted,
    JobProgress,
    JobCompleted,
    MetricThresholdExceeded,
    #[serde(untagged)]
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::DropletCreated => "droplet_created",
            EventKind::JobRequested => "job_requested",
            EventKind::JobStarted => "job_started",
            EventKind::JobProgress => "job_progress",
            EventKind::JobCompleted => "job_completed",
            EventKind::MetricThresholdExceeded => "metric_threshold_exceeded",
            EventKind::Other(s) => s,
        }
    }
}

/// Immutable event payload. `timestamp` is UTC; `trace_id` propagates through
/// every event caused by a single inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(
        rename = "correlation_id",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub correlation: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl Event {
    /// New event with the current UTC timestamp and a generated trace id.
    pub fn new(kind: EventKind) -> Event {
        Event {
            kind,
            job_id: String::new(),
            job_type: String::new(),
            cluster_id: String::new(),
            progress: None,
            message: String::new(),
            timestamp: Utc::now(),
            trace_id: Uuid::new_v4().to_string(),
            correlation: String::new(),
            payload: Map::new(),
        }
    }

    pub fn with_job(mut self, job_id: &str, job_type: &str) -> Event {
        self.job_id = job_id.to_string();
        self.job_type = job_type.to_string();
        self
    }

    pub fn with_cluster(mut self, cluster_id: &str) -> Event {
        self.cluster_id = cluster_id.to_string();
        self
    }

    pub fn with_progress(mut self, progress: u32, message: &str) -> Event {
        self.progress = Some(progress);
        self.message = message.to_string();
        self
    }

    pub fn with_trace(mut self, trace_id: &str) -> Event {
        if !trace_id.is_empty() {
            self.trace_id = trace_id.to_string();
        }
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Event {
        self.payload = payload;
        self
    }
}
